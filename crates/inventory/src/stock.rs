//! A lot's physical presence in one cell.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{CellId, DomainError, DomainResult, Entity, LotId, ProductId, StockRecordId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    /// Sellable: eligible for allocation.
    Available,
    /// Held back (e.g. cycle count); not allocatable.
    Reserved,
    /// Quantity reached zero. Terminal.
    Depleted,
    /// Lot not yet audited, or failed its audit.
    Quarantined,
}

/// Amounts placed by a new stock record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub quantity: i64,
    pub packaging_units: i64,
    pub weight: i64,
    pub volume: i64,
}

/// Result of drawing from a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub remaining_quantity: i64,
    pub depleted: bool,
    /// Cell capacity freed by this draw.
    pub released_footprint: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    id: StockRecordId,
    lot_id: LotId,
    product_id: ProductId,
    cell_id: CellId,
    initial_quantity: i64,
    quantity: i64,
    packaging_units: i64,
    weight: i64,
    volume: i64,
    footprint: i64,
    status: StockStatus,
    created_at: DateTime<Utc>,
    revision: u64,
}

impl StockRecord {
    /// Build a record for a placement. The caller decides the starting status
    /// from the lot's audit state.
    pub fn place(
        id: StockRecordId,
        lot_id: LotId,
        product_id: ProductId,
        cell_id: CellId,
        placement: Placement,
        status: StockStatus,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if placement.quantity <= 0 {
            return Err(DomainError::validation("stock quantity must be positive"));
        }
        if placement.packaging_units < 0 || placement.weight < 0 || placement.volume < 0 {
            return Err(DomainError::validation(
                "packaging units, weight and volume cannot be negative",
            ));
        }
        if !matches!(status, StockStatus::Available | StockStatus::Quarantined) {
            return Err(DomainError::invalid_transition(format!(
                "new stock cannot start as {status:?}"
            )));
        }
        Ok(Self {
            id,
            lot_id,
            product_id,
            cell_id,
            initial_quantity: placement.quantity,
            quantity: placement.quantity,
            packaging_units: placement.packaging_units,
            weight: placement.weight,
            volume: placement.volume,
            footprint: placement.quantity,
            status,
            created_at,
            revision: 0,
        })
    }

    pub fn lot_id(&self) -> LotId {
        self.lot_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn initial_quantity(&self) -> i64 {
        self.initial_quantity
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

    /// Cell capacity currently attributed to this record.
    pub fn footprint(&self) -> i64 {
        self.footprint
    }

    pub fn status(&self) -> StockStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_allocatable(&self) -> bool {
        self.status == StockStatus::Available && self.quantity > 0
    }

    /// Draw `quantity` units and `weight` grams.
    ///
    /// Both amounts must fit independently. Status and every numeric field are
    /// updated together; reaching zero quantity depletes the record and frees
    /// its whole remaining footprint.
    pub fn draw(&mut self, quantity: i64, weight: i64) -> DomainResult<Draw> {
        if quantity <= 0 {
            return Err(DomainError::validation("drawn quantity must be positive"));
        }
        if weight < 0 {
            return Err(DomainError::validation("drawn weight cannot be negative"));
        }
        if self.status == StockStatus::Reserved || self.status == StockStatus::Quarantined {
            return Err(DomainError::invalid_transition(format!(
                "stock record {} is {:?} and cannot be drawn",
                self.id, self.status
            )));
        }
        if quantity > self.quantity || weight > self.weight {
            return Err(DomainError::InsufficientStock {
                record: self.id.to_string(),
                requested_quantity: quantity,
                requested_weight: weight,
                available_quantity: self.quantity,
                available_weight: self.weight,
            });
        }

        let remaining = self.quantity - quantity;
        let released_footprint;
        if remaining == 0 {
            released_footprint = self.footprint;
            self.packaging_units = 0;
            self.weight = 0;
            self.volume = 0;
            self.footprint = 0;
            self.status = StockStatus::Depleted;
        } else {
            released_footprint = self.footprint.min(quantity);
            self.packaging_units -= proportional(self.packaging_units, quantity, self.quantity);
            self.volume -= proportional(self.volume, quantity, self.quantity);
            self.weight -= weight;
            self.footprint -= released_footprint;
        }
        self.quantity = remaining;
        self.revision += 1;

        Ok(Draw {
            remaining_quantity: remaining,
            depleted: remaining == 0,
            released_footprint,
        })
    }

    /// Make quarantined stock sellable (lot passed its audit).
    pub fn release_quarantine(&mut self) -> DomainResult<()> {
        self.transition(StockStatus::Quarantined, StockStatus::Available)
    }

    pub fn hold(&mut self) -> DomainResult<()> {
        self.transition(StockStatus::Available, StockStatus::Reserved)
    }

    pub fn release_hold(&mut self) -> DomainResult<()> {
        self.transition(StockStatus::Reserved, StockStatus::Available)
    }

    fn transition(&mut self, from: StockStatus, to: StockStatus) -> DomainResult<()> {
        if self.status != from {
            return Err(DomainError::invalid_transition(format!(
                "stock record {} is {:?}, expected {:?}",
                self.id, self.status, from
            )));
        }
        self.status = to;
        self.revision += 1;
        Ok(())
    }

    /// `quantity >= 0`, depleted iff quantity == 0, never above the placement.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.quantity < 0 || self.weight < 0 || self.footprint < 0 {
            return Err(DomainError::invariant(format!(
                "stock record {} has negative amounts",
                self.id
            )));
        }
        if (self.status == StockStatus::Depleted) != (self.quantity == 0) {
            return Err(DomainError::invariant(format!(
                "stock record {} status {:?} disagrees with quantity {}",
                self.id, self.status, self.quantity
            )));
        }
        if self.quantity > self.initial_quantity {
            return Err(DomainError::invariant(format!(
                "stock record {} grew past its placement",
                self.id
            )));
        }
        Ok(())
    }
}

impl Entity for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// Share of `total` that corresponds to `part` out of `whole` (floored).
pub(crate) fn proportional(total: i64, part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    ((total as i128 * part as i128) / whole as i128) as i64
}
