use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use stockroom_core::DomainError;

use crate::{Actor, Permission, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden(permission) => DomainError::unauthorized(permission),
        }
    }
}

/// Maps roles to the permissions they grant.
///
/// Constructed once at process start and handed to the services, so workflow
/// legality never depends on how the caller authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    grants: HashMap<Role, Vec<Permission>>,
}

impl RolePolicy {
    /// A policy with no grants at all.
    pub fn empty() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    pub fn grant(mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.entry(role).or_default().extend(permissions);
        self
    }

    /// Effective permissions of an actor (union over its roles).
    pub fn permissions_for(&self, actor: &Actor) -> BTreeSet<Permission> {
        actor
            .roles
            .iter()
            .filter_map(|role| self.grants.get(role))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn allows(&self, actor: &Actor, required: &Permission) -> bool {
        authorize(self, actor, required).is_ok()
    }

    pub fn can_approve(&self, actor: &Actor) -> bool {
        self.allows(actor, &Permission::APPROVE_DEPARTURES)
    }

    pub fn can_dispatch(&self, actor: &Actor) -> bool {
        self.allows(actor, &Permission::DISPATCH_DEPARTURES)
    }

    pub fn can_edit(&self, actor: &Actor) -> bool {
        self.allows(actor, &Permission::EDIT_DEPARTURES)
    }

    pub fn can_audit(&self, actor: &Actor) -> bool {
        self.allows(actor, &Permission::AUDIT_LOTS)
    }

    pub fn can_manage_stock(&self, actor: &Actor) -> bool {
        self.allows(actor, &Permission::MANAGE_STOCK)
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::empty()
            .grant(Role::ADMIN, [Permission::WILDCARD])
            .grant(
                Role::WAREHOUSE_MANAGER,
                [
                    Permission::APPROVE_DEPARTURES,
                    Permission::DISPATCH_DEPARTURES,
                    Permission::AUDIT_LOTS,
                    Permission::MANAGE_STOCK,
                ],
            )
            .grant(
                Role::WAREHOUSE_OPERATOR,
                [Permission::DISPATCH_DEPARTURES, Permission::MANAGE_STOCK],
            )
            .grant(Role::QUALITY_INSPECTOR, [Permission::AUDIT_LOTS])
            .grant(Role::REQUESTER, [Permission::EDIT_DEPARTURES])
    }
}

/// Check that `actor` holds `required` under `policy`.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(policy: &RolePolicy, actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    let perms = policy.permissions_for(actor);

    if perms.iter().any(Permission::is_wildcard) || perms.contains(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
