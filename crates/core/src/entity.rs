//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing revision, bumped by every mutation.
    ///
    /// Used for version-checked writes (compare-and-swap) at the store boundary.
    fn revision(&self) -> u64;
}
