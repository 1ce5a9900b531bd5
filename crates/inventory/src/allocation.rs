//! Expiry-priority FIFO planning and the immutable allocation ledger entry.
//!
//! Planning is pure: it ranks candidate stock and decides how much to draw
//! from each, without touching any record. Applying a plan is the ledger's job.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    AllocationId, CellId, DepartureRequestId, DomainError, DomainResult, LotId, ProductId,
    StockRecordId,
};

use crate::cell::CellCoordinate;
use crate::stock::proportional;

/// Allocatable stock joined with the lot and cell data the ranking needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub stock_record_id: StockRecordId,
    pub lot_id: LotId,
    pub cell_id: CellId,
    pub quantity: i64,
    pub weight: i64,
    /// Record revision the candidate was read at.
    pub revision: u64,
    pub expires_on: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    pub coordinate: CellCoordinate,
}

/// Earliest expiry first (unknown expiry last), then oldest receipt, then
/// cell coordinate, then record id so the order is total.
pub fn fifo_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    let expiry = match (a.expires_on, b.expires_on) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    expiry
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.coordinate.cmp(&b.coordinate))
        .then_with(|| a.stock_record_id.cmp(&b.stock_record_id))
}

/// One step of a plan: how much to take from one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDraw {
    pub stock_record_id: StockRecordId,
    pub lot_id: LotId,
    pub cell_id: CellId,
    pub quantity: i64,
    pub weight: i64,
    pub would_deplete: bool,
    /// Revision the record must still be at when the draw is applied.
    pub expected_revision: u64,
}

/// Ordered draws covering one requested amount of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub product_id: ProductId,
    pub requested_quantity: i64,
    pub requested_weight: Option<i64>,
    pub draws: Vec<PlannedDraw>,
}

impl AllocationPlan {
    pub fn total_quantity(&self) -> i64 {
        self.draws.iter().map(|d| d.quantity).sum()
    }

    pub fn total_weight(&self) -> i64 {
        self.draws.iter().map(|d| d.weight).sum()
    }
}

/// Weight that leaves with `take` units of a record holding `quantity`/`weight`.
///
/// Taking the whole record takes its whole weight; partial takes are floored.
pub fn weight_for(take: i64, quantity: i64, weight: i64) -> i64 {
    if take >= quantity {
        weight
    } else {
        proportional(weight, take, quantity)
    }
}

/// Largest take from a record whose weight stays within `budget`.
fn max_take_within(budget: i64, quantity: i64, weight: i64) -> i64 {
    if weight <= budget {
        return quantity;
    }
    // weight > budget >= 0, so weight > 0 here.
    proportional(quantity, budget, weight).min(quantity)
}

/// Plan a draw of `quantity` units (and at most `max_weight` grams) from
/// `candidates`, greedily in FIFO order.
///
/// Fails with `InsufficientInventory` rather than returning a partial plan.
/// Identical inputs always produce the identical plan.
pub fn plan_fifo(
    product_id: ProductId,
    quantity: i64,
    max_weight: Option<i64>,
    mut candidates: Vec<Candidate>,
) -> DomainResult<AllocationPlan> {
    if quantity <= 0 {
        return Err(DomainError::validation("requested quantity must be positive"));
    }
    if let Some(w) = max_weight {
        if w <= 0 {
            return Err(DomainError::validation("requested weight must be positive"));
        }
    }

    candidates.retain(|c| c.quantity > 0);
    candidates.sort_by(fifo_cmp);

    let mut remaining_quantity = quantity;
    let mut remaining_weight = max_weight;
    let mut draws = Vec::new();

    for c in &candidates {
        if remaining_quantity == 0 {
            break;
        }

        let mut take = remaining_quantity.min(c.quantity);
        if let Some(budget) = remaining_weight {
            take = take.min(max_take_within(budget, c.quantity, c.weight));
        }
        if take == 0 {
            continue;
        }

        let weight = weight_for(take, c.quantity, c.weight);
        remaining_quantity -= take;
        if let Some(budget) = remaining_weight.as_mut() {
            *budget -= weight;
        }

        draws.push(PlannedDraw {
            stock_record_id: c.stock_record_id,
            lot_id: c.lot_id,
            cell_id: c.cell_id,
            quantity: take,
            weight,
            would_deplete: take == c.quantity,
            expected_revision: c.revision,
        });
    }

    if remaining_quantity > 0 {
        return Err(DomainError::InsufficientInventory {
            product: product_id.to_string(),
            requested: quantity,
            available: quantity - remaining_quantity,
        });
    }

    Ok(AllocationPlan {
        product_id,
        requested_quantity: quantity,
        requested_weight: max_weight,
        draws,
    })
}

/// Immutable record of stock drawn for one departure line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    id: AllocationId,
    request_id: DepartureRequestId,
    line_no: u32,
    stock_record_id: StockRecordId,
    lot_id: LotId,
    cell_id: CellId,
    quantity: i64,
    weight: i64,
    depleted_record: bool,
    created_at: DateTime<Utc>,
}

impl Allocation {
    pub fn new(
        request_id: DepartureRequestId,
        line_no: u32,
        draw: &PlannedDraw,
        depleted_record: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            request_id,
            line_no,
            stock_record_id: draw.stock_record_id,
            lot_id: draw.lot_id,
            cell_id: draw.cell_id,
            quantity: draw.quantity,
            weight: draw.weight,
            depleted_record,
            created_at,
        }
    }

    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn request_id(&self) -> DepartureRequestId {
        self.request_id
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn stock_record_id(&self) -> StockRecordId {
        self.stock_record_id
    }

    pub fn lot_id(&self) -> LotId {
        self.lot_id
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn depleted_record(&self) -> bool {
        self.depleted_record
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
