use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{AggregateId, CellId, EntryOrderId, LotId, ProductId, StockRecordId};
use stockroom_events::Event;

use crate::audit::AuditResult;
use crate::lot::AuditStatus;
use crate::packaging::PackagingCode;
use crate::stock::StockStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOrderRecorded {
    pub entry_order_id: EntryOrderId,
    pub lot_ids: Vec<LotId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCreated {
    pub stock_record_id: StockRecordId,
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub cell_id: CellId,
    pub quantity: i64,
    pub weight: i64,
    pub status: StockStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConsumed {
    pub stock_record_id: StockRecordId,
    pub cell_id: CellId,
    pub quantity: i64,
    pub weight: i64,
    pub remaining_quantity: i64,
    pub depleted: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub stock_record_id: StockRecordId,
    pub lot_id: LotId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHoldChanged {
    pub stock_record_id: StockRecordId,
    pub held: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReservationChanged {
    pub cell_id: CellId,
    pub reserved: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAudited {
    pub lot_id: LotId,
    pub entry_order_id: EntryOrderId,
    pub result: AuditResult,
    pub packaging_code: PackagingCode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOrderAuditStatusChanged {
    pub entry_order_id: EntryOrderId,
    pub status: AuditStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    EntryOrderRecorded(EntryOrderRecorded),
    StockCreated(StockCreated),
    StockConsumed(StockConsumed),
    StockReleased(StockReleased),
    StockHoldChanged(StockHoldChanged),
    CellReservationChanged(CellReservationChanged),
    LotAudited(LotAudited),
    EntryOrderAuditStatusChanged(EntryOrderAuditStatusChanged),
}

impl InventoryEvent {
    /// The entity this event belongs to, with its stream type.
    pub fn subject(&self) -> (AggregateId, &'static str) {
        match self {
            InventoryEvent::EntryOrderRecorded(e) => (e.entry_order_id.into(), "inventory.entry_order"),
            InventoryEvent::StockCreated(e) => (e.stock_record_id.into(), "inventory.stock"),
            InventoryEvent::StockConsumed(e) => (e.stock_record_id.into(), "inventory.stock"),
            InventoryEvent::StockReleased(e) => (e.stock_record_id.into(), "inventory.stock"),
            InventoryEvent::StockHoldChanged(e) => (e.stock_record_id.into(), "inventory.stock"),
            InventoryEvent::CellReservationChanged(e) => (e.cell_id.into(), "inventory.cell"),
            InventoryEvent::LotAudited(e) => (e.lot_id.into(), "inventory.lot"),
            InventoryEvent::EntryOrderAuditStatusChanged(e) => {
                (e.entry_order_id.into(), "inventory.entry_order")
            }
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::EntryOrderRecorded(_) => "inventory.entry_order.recorded",
            InventoryEvent::StockCreated(_) => "inventory.stock.created",
            InventoryEvent::StockConsumed(_) => "inventory.stock.consumed",
            InventoryEvent::StockReleased(_) => "inventory.stock.released",
            InventoryEvent::StockHoldChanged(_) => "inventory.stock.held",
            InventoryEvent::CellReservationChanged(_) => "inventory.cell.reservation_changed",
            InventoryEvent::LotAudited(_) => "inventory.lot.audited",
            InventoryEvent::EntryOrderAuditStatusChanged(_) => {
                "inventory.entry_order.audit_status_changed"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::EntryOrderRecorded(e) => e.occurred_at,
            InventoryEvent::StockCreated(e) => e.occurred_at,
            InventoryEvent::StockConsumed(e) => e.occurred_at,
            InventoryEvent::StockReleased(e) => e.occurred_at,
            InventoryEvent::StockHoldChanged(e) => e.occurred_at,
            InventoryEvent::CellReservationChanged(e) => e.occurred_at,
            InventoryEvent::LotAudited(e) => e.occurred_at,
            InventoryEvent::EntryOrderAuditStatusChanged(e) => e.occurred_at,
        }
    }
}
