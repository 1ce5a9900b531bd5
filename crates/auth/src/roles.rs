use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings; a [`crate::RolePolicy`] maps them to permissions.
/// The constants below are the roles the default policy knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Warehouse authority: reviews departures, audits lots, dispatches.
    pub const WAREHOUSE_MANAGER: Role = Role(Cow::Borrowed("warehouse_manager"));
    /// Floor staff: places and dispatches stock.
    pub const WAREHOUSE_OPERATOR: Role = Role(Cow::Borrowed("warehouse_operator"));
    pub const QUALITY_INSPECTOR: Role = Role(Cow::Borrowed("quality_inspector"));
    /// Client-side requester: submits and edits departure requests.
    pub const REQUESTER: Role = Role(Cow::Borrowed("requester"));
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
