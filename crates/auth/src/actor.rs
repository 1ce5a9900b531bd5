use serde::{Deserialize, Serialize};

use stockroom_core::UserId;

use crate::Role;

/// The identity performing an operation, with the roles it declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: UserId, roles: Vec<Role>) -> Self {
        Self { id, roles }
    }

    /// Convenience constructor for a single-role actor with a fresh id.
    pub fn with_role(role: Role) -> Self {
        Self::new(UserId::new(), vec![role])
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
