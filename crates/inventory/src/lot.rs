//! Received product lots and the entry orders that own them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, Entity, EntryOrderId, LotId, ProductId};

use crate::packaging::{Packaging, PackagingCondition, PackagingKind};

/// Quality-gate status of a lot (and, in aggregate, of an entry order).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Passed,
    Failed,
}

impl AuditStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuditStatus::Pending)
    }
}

/// Input describing one line of an entry order.
///
/// Weights are in grams and volumes in cubic centimetres.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraft {
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub packaging_units: i64,
    pub weight: i64,
    pub volume: i64,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub packaging_kind: PackagingKind,
    pub packaging_condition: PackagingCondition,
}

/// A received batch of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLot {
    pub(crate) id: LotId,
    pub(crate) entry_order_id: EntryOrderId,
    pub(crate) product_id: ProductId,
    pub(crate) quantity: i64,
    pub(crate) packaging_units: i64,
    pub(crate) weight: i64,
    pub(crate) volume: i64,
    pub(crate) manufactured_on: Option<NaiveDate>,
    pub(crate) expires_on: Option<NaiveDate>,
    pub(crate) received_at: DateTime<Utc>,
    pub(crate) packaging: Packaging,
    pub(crate) remaining_quantity: i64,
    pub(crate) remaining_weight: i64,
    pub(crate) placed_quantity: i64,
    pub(crate) placed_weight: i64,
    pub(crate) audit_status: AuditStatus,
    pub(crate) revision: u64,
}

impl ProductLot {
    /// Register a lot as part of an entry order. Audit starts as pending.
    pub fn receive(
        entry_order_id: EntryOrderId,
        draft: LotDraft,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if draft.quantity <= 0 {
            return Err(DomainError::validation("lot quantity must be positive"));
        }
        if draft.packaging_units < 0 || draft.weight < 0 || draft.volume < 0 {
            return Err(DomainError::validation(
                "packaging units, weight and volume cannot be negative",
            ));
        }
        if let (Some(made), Some(expires)) = (draft.manufactured_on, draft.expires_on) {
            if expires < made {
                return Err(DomainError::validation(
                    "expiration date precedes manufacturing date",
                ));
            }
        }

        Ok(Self {
            id: draft.lot_id,
            entry_order_id,
            product_id: draft.product_id,
            quantity: draft.quantity,
            packaging_units: draft.packaging_units,
            weight: draft.weight,
            volume: draft.volume,
            manufactured_on: draft.manufactured_on,
            expires_on: draft.expires_on,
            received_at,
            packaging: Packaging::new(draft.packaging_kind, draft.packaging_condition),
            remaining_quantity: draft.quantity,
            remaining_weight: draft.weight,
            placed_quantity: 0,
            placed_weight: 0,
            audit_status: AuditStatus::Pending,
            revision: 0,
        })
    }

    pub fn entry_order_id(&self) -> EntryOrderId {
        self.entry_order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn packaging_units(&self) -> i64 {
        self.packaging_units
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn volume(&self) -> i64 {
        self.volume
    }

    pub fn manufactured_on(&self) -> Option<NaiveDate> {
        self.manufactured_on
    }

    pub fn expires_on(&self) -> Option<NaiveDate> {
        self.expires_on
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn packaging(&self) -> Packaging {
        self.packaging
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.remaining_quantity
    }

    pub fn remaining_weight(&self) -> i64 {
        self.remaining_weight
    }

    pub fn placed_quantity(&self) -> i64 {
        self.placed_quantity
    }

    pub fn placed_weight(&self) -> i64 {
        self.placed_weight
    }

    pub fn audit_status(&self) -> AuditStatus {
        self.audit_status
    }

    /// Whether new stock may still be placed for this lot.
    pub fn accepts_placement(&self) -> bool {
        self.audit_status != AuditStatus::Failed
    }

    /// Account for `quantity` units weighing `weight` grams being shelved
    /// into a cell. Both running totals stay within the declared lot.
    pub fn record_placement(&mut self, quantity: i64, weight: i64) -> DomainResult<()> {
        if !self.accepts_placement() {
            return Err(DomainError::invalid_transition(format!(
                "lot {} failed its audit and cannot be shelved",
                self.id
            )));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("placed quantity must be positive"));
        }
        if weight < 0 {
            return Err(DomainError::validation("placed weight cannot be negative"));
        }
        if self.placed_quantity + quantity > self.quantity {
            return Err(DomainError::validation(format!(
                "placing {quantity} units would exceed lot {} quantity ({} of {} already placed)",
                self.id, self.placed_quantity, self.quantity
            )));
        }
        if self.placed_weight + weight > self.weight {
            return Err(DomainError::validation(format!(
                "placing {weight} g would exceed lot {} weight ({} of {} g already placed)",
                self.id, self.placed_weight, self.weight
            )));
        }
        self.placed_quantity += quantity;
        self.placed_weight += weight;
        self.revision += 1;
        Ok(())
    }

    /// Account for stock drawn by a dispatch.
    pub fn record_consumption(&mut self, quantity: i64, weight: i64) -> DomainResult<()> {
        if quantity > self.remaining_quantity || weight > self.remaining_weight {
            return Err(DomainError::invariant(format!(
                "lot {} cannot give {quantity} units / {weight} g (remaining {} / {})",
                self.id, self.remaining_quantity, self.remaining_weight
            )));
        }
        self.remaining_quantity -= quantity;
        self.remaining_weight -= weight;
        self.revision += 1;
        Ok(())
    }
}

impl Entity for ProductLot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// An inbound order: the exclusive owner of its lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOrder {
    id: EntryOrderId,
    lot_ids: Vec<LotId>,
    audit_status: AuditStatus,
    recorded_at: DateTime<Utc>,
    revision: u64,
}

impl EntryOrder {
    pub fn new(id: EntryOrderId, lot_ids: Vec<LotId>, recorded_at: DateTime<Utc>) -> DomainResult<Self> {
        if lot_ids.is_empty() {
            return Err(DomainError::validation("entry order needs at least one lot"));
        }
        Ok(Self {
            id,
            lot_ids,
            audit_status: AuditStatus::Pending,
            recorded_at,
            revision: 0,
        })
    }

    pub fn lot_ids(&self) -> &[LotId] {
        &self.lot_ids
    }

    pub fn audit_status(&self) -> AuditStatus {
        self.audit_status
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Store a freshly reduced status. Returns whether it changed.
    pub fn set_audit_status(&mut self, status: AuditStatus) -> bool {
        if self.audit_status == status {
            return false;
        }
        self.audit_status = status;
        self.revision += 1;
        true
    }
}

impl Entity for EntryOrder {
    type Id = EntryOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}
