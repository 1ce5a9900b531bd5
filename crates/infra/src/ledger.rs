//! Cell & inventory ledger.
//!
//! The `*_in` functions are the only code that mutates stock records and
//! cells. They operate on a transaction's working state so the fulfillment
//! service can compose several of them into one atomic dispatch; [`Ledger`]
//! wraps each in its own transaction for standalone use.

use chrono::{DateTime, Utc};

use stockroom_auth::{Actor, Permission, RolePolicy, authorize};
use stockroom_core::{
    CellId, DomainError, DomainResult, Entity, EntryOrderId, ExpectedVersion, LotId, ProductId,
    StockRecordId, WarehouseId,
};
use stockroom_events::EventBus;
use stockroom_inventory::events::{
    CellReservationChanged, EntryOrderRecorded, StockConsumed, StockCreated, StockHoldChanged,
};
use stockroom_inventory::{
    AuditStatus, Cell, CellFilter, Draw, EntryOrder, InventoryEvent, LotDraft, Placement,
    ProductLot, StockRecord, StockStatus,
};

use crate::publisher::{EventPublisher, JsonEnvelope, Outbox};
use crate::store::{TransactionalStore, WarehouseState};

pub(crate) fn require(policy: &RolePolicy, actor: &Actor, permission: &Permission) -> DomainResult<()> {
    authorize(policy, actor, permission).map_err(DomainError::from)
}

pub(crate) fn record_entry_order_in(
    state: &mut WarehouseState,
    order_id: EntryOrderId,
    drafts: Vec<LotDraft>,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<EntryOrder> {
    let lots = drafts
        .into_iter()
        .map(|draft| ProductLot::receive(order_id, draft, at))
        .collect::<DomainResult<Vec<_>>>()?;
    let lot_ids: Vec<LotId> = lots.iter().map(|l| *l.id()).collect();
    let order = EntryOrder::new(order_id, lot_ids.clone(), at)?;

    state.lots.insert_entry_order(order.clone(), lots)?;
    outbox.inventory(
        InventoryEvent::EntryOrderRecorded(EntryOrderRecorded {
            entry_order_id: order_id,
            lot_ids,
            occurred_at: at,
        }),
        order.revision(),
    )?;
    Ok(order)
}

/// Shelve part of a lot into a cell.
///
/// Stock of a pending lot starts quarantined; a failed lot cannot be shelved.
pub(crate) fn create_stock_in(
    state: &mut WarehouseState,
    lot_id: LotId,
    cell_id: CellId,
    placement: Placement,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<StockRecord> {
    let lot = state.lots.lot(lot_id)?;
    let status = match lot.audit_status() {
        AuditStatus::Pending => StockStatus::Quarantined,
        AuditStatus::Passed => StockStatus::Available,
        AuditStatus::Failed => {
            return Err(DomainError::invalid_transition(format!(
                "lot {lot_id} failed its audit and cannot be shelved"
            )));
        }
    };
    let record = StockRecord::place(
        StockRecordId::new(),
        lot_id,
        lot.product_id(),
        cell_id,
        placement,
        status,
        at,
    )?;

    state.lots.lot_mut(lot_id)?.record_placement(placement.quantity, placement.weight)?;
    state.ledger.cell_mut(cell_id)?.occupy(record.footprint())?;

    outbox.inventory(
        InventoryEvent::StockCreated(StockCreated {
            stock_record_id: *record.id(),
            lot_id,
            product_id: record.product_id(),
            cell_id,
            quantity: record.quantity(),
            weight: record.weight(),
            status,
            occurred_at: at,
        }),
        record.revision(),
    )?;
    state.ledger.insert_stock(record.clone());
    Ok(record)
}

/// Draw from one record, keeping the record, its cell and its lot in step.
pub(crate) fn consume_in(
    state: &mut WarehouseState,
    record_id: StockRecordId,
    quantity: i64,
    weight: i64,
    expected: ExpectedVersion,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<Draw> {
    let record = state.ledger.stock(record_id)?;
    expected.check(record.revision())?;
    let cell_id = record.cell_id();
    let lot_id = record.lot_id();

    let record = state.ledger.stock_mut(record_id)?;
    let draw = record.draw(quantity, weight)?;
    let revision = record.revision();

    state.ledger.cell_mut(cell_id)?.release(draw.released_footprint)?;
    state.lots.lot_mut(lot_id)?.record_consumption(quantity, weight)?;

    outbox.inventory(
        InventoryEvent::StockConsumed(StockConsumed {
            stock_record_id: record_id,
            cell_id,
            quantity,
            weight,
            remaining_quantity: draw.remaining_quantity,
            depleted: draw.depleted,
            occurred_at: at,
        }),
        revision,
    )?;
    Ok(draw)
}

pub(crate) fn set_hold_in(
    state: &mut WarehouseState,
    record_id: StockRecordId,
    held: bool,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<StockRecord> {
    let record = state.ledger.stock_mut(record_id)?;
    if held {
        record.hold()?;
    } else {
        record.release_hold()?;
    }
    outbox.inventory(
        InventoryEvent::StockHoldChanged(StockHoldChanged {
            stock_record_id: record_id,
            held,
            occurred_at: at,
        }),
        record.revision(),
    )?;
    Ok(record.clone())
}

pub(crate) fn set_cell_reservation_in(
    state: &mut WarehouseState,
    cell_id: CellId,
    reserved: bool,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> DomainResult<Cell> {
    let cell = state.ledger.cell_mut(cell_id)?;
    if reserved {
        cell.reserve()?;
    } else {
        cell.unreserve()?;
    }
    outbox.inventory(
        InventoryEvent::CellReservationChanged(CellReservationChanged {
            cell_id,
            reserved,
            occurred_at: at,
        }),
        cell.revision(),
    )?;
    Ok(cell.clone())
}

pub(crate) fn remove_cell_in(state: &mut WarehouseState, cell_id: CellId) -> DomainResult<Cell> {
    let live = state
        .ledger
        .stock_in_cell(cell_id)
        .filter(|r| r.status() != StockStatus::Depleted)
        .count();
    if live > 0 {
        return Err(DomainError::invalid_transition(format!(
            "cell {cell_id} still holds {live} stock record(s)"
        )));
    }
    state.ledger.remove_cell(cell_id)
}

/// Allocatable stock of a product, optionally narrowed by cell.
pub(crate) fn query_in(
    state: &WarehouseState,
    product_id: ProductId,
    filter: Option<&CellFilter>,
) -> DomainResult<Vec<StockRecord>> {
    let mut out = Vec::new();
    for record in state.ledger.stock_records() {
        if record.product_id() != product_id || !record.is_allocatable() {
            continue;
        }
        if let Some(filter) = filter {
            if !filter.matches(state.ledger.cell(record.cell_id())?) {
                continue;
            }
        }
        out.push(record.clone());
    }
    Ok(out)
}

/// Standalone ledger operations, each in its own transaction.
#[derive(Debug, Clone)]
pub struct Ledger<S, B> {
    store: S,
    publisher: EventPublisher<B>,
    policy: RolePolicy,
}

impl<S, B> Ledger<S, B>
where
    S: TransactionalStore,
    B: EventBus<JsonEnvelope>,
{
    pub fn new(store: S, publisher: EventPublisher<B>, policy: RolePolicy) -> Self {
        Self {
            store,
            publisher,
            policy,
        }
    }

    fn commit<R>(
        &self,
        f: impl FnOnce(&mut WarehouseState, &mut Outbox) -> DomainResult<R>,
    ) -> DomainResult<R> {
        let (out, outbox) = self.store.transaction(|state| {
            let mut outbox = Outbox::new();
            let out = f(state, &mut outbox)?;
            Ok((out, outbox))
        })?;
        self.publisher.publish_all(outbox);
        Ok(out)
    }

    /// Make a cell known to the engine. Cells come from the warehouse layout.
    pub fn register_cell(&self, actor: &Actor, cell: Cell) -> DomainResult<()> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let cell_id = *cell.id();
        self.store.transaction(|state| state.ledger.insert_cell(cell))?;
        tracing::info!(%cell_id, "cell registered");
        Ok(())
    }

    /// Delete a cell. Refused while live stock references it.
    pub fn remove_cell(&self, actor: &Actor, cell_id: CellId) -> DomainResult<Cell> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let cell = self.store.transaction(|state| remove_cell_in(state, cell_id))?;
        tracing::info!(%cell_id, "cell removed");
        Ok(cell)
    }

    pub fn record_entry_order(
        &self,
        actor: &Actor,
        order_id: EntryOrderId,
        lots: Vec<LotDraft>,
    ) -> DomainResult<EntryOrder> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        let order = self.commit(|state, outbox| record_entry_order_in(state, order_id, lots, at, outbox))?;
        tracing::info!(%order_id, lots = order.lot_ids().len(), "entry order recorded");
        Ok(order)
    }

    pub fn create_stock(
        &self,
        actor: &Actor,
        lot_id: LotId,
        cell_id: CellId,
        placement: Placement,
    ) -> DomainResult<StockRecord> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        let record = self.commit(|state, outbox| create_stock_in(state, lot_id, cell_id, placement, at, outbox))?;
        tracing::info!(
            stock_record_id = %record.id(),
            %lot_id,
            %cell_id,
            quantity = record.quantity(),
            status = ?record.status(),
            "stock created"
        );
        Ok(record)
    }

    /// Draw directly from one record (manual adjustments, picking outside a
    /// departure). Dispatches go through the fulfillment service instead.
    pub fn consume(
        &self,
        actor: &Actor,
        record_id: StockRecordId,
        quantity: i64,
        weight: i64,
        expected: ExpectedVersion,
    ) -> DomainResult<Draw> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        let draw = self.commit(|state, outbox| {
            consume_in(state, record_id, quantity, weight, expected, at, outbox)
        })?;
        tracing::info!(
            stock_record_id = %record_id,
            quantity,
            weight,
            remaining = draw.remaining_quantity,
            depleted = draw.depleted,
            "stock consumed"
        );
        Ok(draw)
    }

    pub fn hold_stock(&self, actor: &Actor, record_id: StockRecordId) -> DomainResult<StockRecord> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        self.commit(|state, outbox| set_hold_in(state, record_id, true, at, outbox))
    }

    pub fn release_hold(&self, actor: &Actor, record_id: StockRecordId) -> DomainResult<StockRecord> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        self.commit(|state, outbox| set_hold_in(state, record_id, false, at, outbox))
    }

    pub fn reserve_cell(&self, actor: &Actor, cell_id: CellId) -> DomainResult<Cell> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        self.commit(|state, outbox| set_cell_reservation_in(state, cell_id, true, at, outbox))
    }

    pub fn release_cell(&self, actor: &Actor, cell_id: CellId) -> DomainResult<Cell> {
        require(&self.policy, actor, &Permission::MANAGE_STOCK)?;
        let at = Utc::now();
        self.commit(|state, outbox| set_cell_reservation_in(state, cell_id, false, at, outbox))
    }

    pub fn query(&self, product_id: ProductId, filter: Option<&CellFilter>) -> DomainResult<Vec<StockRecord>> {
        self.store.read(|state| query_in(state, product_id, filter))
    }

    pub fn get_cell(&self, cell_id: CellId) -> DomainResult<Cell> {
        self.store.read(|state| state.ledger.cell(cell_id).cloned())
    }

    pub fn cells_in_warehouse(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<Cell>> {
        self.store.read(|state| {
            Ok(state
                .ledger
                .cells()
                .filter(|c| c.warehouse_id() == warehouse_id)
                .cloned()
                .collect())
        })
    }

    pub fn get_stock(&self, record_id: StockRecordId) -> DomainResult<StockRecord> {
        self.store.read(|state| state.ledger.stock(record_id).cloned())
    }

    pub fn get_product_lot(&self, lot_id: LotId) -> DomainResult<ProductLot> {
        self.store.read(|state| state.lots.lot(lot_id).cloned())
    }

    /// Every record ever placed for a lot, depleted ones included.
    pub fn stock_for_lot(&self, lot_id: LotId) -> DomainResult<Vec<StockRecord>> {
        self.store.read(|state| {
            state.lots.lot(lot_id)?;
            Ok(state.ledger.stock_for_lot(lot_id).cloned().collect())
        })
    }
}
