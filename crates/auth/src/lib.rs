//! `stockroom-auth`: capability checks at the engine boundary.
//!
//! Decoupled from any transport-layer authentication: callers resolve who the
//! actor is and which roles they hold; this crate decides what those roles may do.

pub mod actor;
pub mod authorize;
pub mod permissions;
pub mod roles;

pub use actor::Actor;
pub use authorize::{AuthzError, RolePolicy, authorize};
pub use permissions::Permission;
pub use roles::Role;
