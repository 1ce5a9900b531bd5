//! Inventory domain module: lots, cells, stock, audits and allocation planning.
//!
//! Business rules only, implemented as deterministic domain logic (no IO, no
//! storage). The infra crate wraps these in transactions.

pub mod allocation;
pub mod audit;
pub mod cell;
pub mod events;
pub mod lot;
pub mod packaging;
pub mod stock;

pub use allocation::{
    Allocation, AllocationPlan, Candidate, PlannedDraw, fifo_cmp, plan_fifo, weight_for,
};
pub use audit::{
    AuditRecord, AuditResult, AuditSubmission, Discrepancy, PackagingCorrection,
    aggregate_audit_status,
};
pub use cell::{Cell, CellCoordinate, CellFilter, CellStatus};
pub use events::InventoryEvent;
pub use lot::{AuditStatus, EntryOrder, LotDraft, ProductLot};
pub use packaging::{Packaging, PackagingCode, PackagingCondition, PackagingKind, classify};
pub use stock::{Draw, Placement, StockRecord, StockStatus};
