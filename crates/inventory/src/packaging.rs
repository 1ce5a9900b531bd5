//! Packaging classifier: (kind, condition) → numeric packaging code.

use serde::{Deserialize, Serialize};

use stockroom_core::ValueObject;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagingKind {
    Pallet,
    Box,
    Bag,
    Drum,
    Bundle,
    Loose,
    #[serde(other)]
    Other,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagingCondition {
    Normal,
    Damaged,
    #[serde(other)]
    Other,
}

impl From<&str> for PackagingKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pallet" => Self::Pallet,
            "box" | "carton" => Self::Box,
            "bag" | "sack" => Self::Bag,
            "drum" | "barrel" => Self::Drum,
            "bundle" => Self::Bundle,
            "loose" | "unit" => Self::Loose,
            _ => Self::Other,
        }
    }
}

impl From<&str> for PackagingCondition {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "good" | "intact" => Self::Normal,
            "damaged" | "broken" => Self::Damaged,
            _ => Self::Other,
        }
    }
}

/// Numeric packaging code printed on labels and compared during audits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackagingCode(pub u16);

impl PackagingCode {
    /// Code for any combination missing from the table.
    pub const UNCLASSIFIED: PackagingCode = PackagingCode(99);
}

impl core::fmt::Display for PackagingCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

const CODE_TABLE: &[(PackagingKind, PackagingCondition, u16)] = &[
    (PackagingKind::Pallet, PackagingCondition::Normal, 11),
    (PackagingKind::Pallet, PackagingCondition::Damaged, 12),
    (PackagingKind::Box, PackagingCondition::Normal, 21),
    (PackagingKind::Box, PackagingCondition::Damaged, 22),
    (PackagingKind::Bag, PackagingCondition::Normal, 31),
    (PackagingKind::Bag, PackagingCondition::Damaged, 32),
    (PackagingKind::Drum, PackagingCondition::Normal, 41),
    (PackagingKind::Drum, PackagingCondition::Damaged, 42),
    (PackagingKind::Bundle, PackagingCondition::Normal, 51),
    (PackagingKind::Bundle, PackagingCondition::Damaged, 52),
    (PackagingKind::Loose, PackagingCondition::Normal, 61),
];

/// Classify a packaging combination. Total and side-effect free.
pub fn classify(kind: PackagingKind, condition: PackagingCondition) -> PackagingCode {
    CODE_TABLE
        .iter()
        .find(|(k, c, _)| *k == kind && *c == condition)
        .map(|(_, _, code)| PackagingCode(*code))
        .unwrap_or(PackagingCode::UNCLASSIFIED)
}

/// Packaging description of a lot, with its derived code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packaging {
    pub kind: PackagingKind,
    pub condition: PackagingCondition,
    pub code: PackagingCode,
}

impl ValueObject for Packaging {}

impl Packaging {
    pub fn new(kind: PackagingKind, condition: PackagingCondition) -> Self {
        Self {
            kind,
            condition,
            code: classify(kind, condition),
        }
    }
}
