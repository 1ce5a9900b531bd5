use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "departures.approve"). The wildcard
/// `"*"` grants everything without hardcoding every capability into a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const APPROVE_DEPARTURES: Permission = Permission(Cow::Borrowed("departures.approve"));
    pub const DISPATCH_DEPARTURES: Permission = Permission(Cow::Borrowed("departures.dispatch"));
    pub const EDIT_DEPARTURES: Permission = Permission(Cow::Borrowed("departures.edit"));
    pub const AUDIT_LOTS: Permission = Permission(Cow::Borrowed("lots.audit"));
    pub const MANAGE_STOCK: Permission = Permission(Cow::Borrowed("stock.manage"));
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
