//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**: two packaging descriptions or two
//! cell coordinates with the same attributes are the same value.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one (e.g. a packaging correction produces a new `Packaging`).
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct CellCoordinate { aisle: u32, bay: u32, level: u32 }
///
/// impl ValueObject for CellCoordinate {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
