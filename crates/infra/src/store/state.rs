use std::collections::{BTreeMap, BTreeSet};

use stockroom_core::{
    CellId, DepartureRequestId, DomainError, DomainResult, Entity, EntryOrderId, LotId,
    StockRecordId,
};
use stockroom_departures::DepartureRequest;
use stockroom_inventory::{Allocation, AuditRecord, Cell, EntryOrder, ProductLot, StockRecord};

/// Cells and the stock records placed in them.
#[derive(Debug, Clone, Default)]
pub struct LedgerTables {
    cells: BTreeMap<CellId, Cell>,
    stock: BTreeMap<StockRecordId, StockRecord>,
    by_cell: BTreeMap<CellId, BTreeSet<StockRecordId>>,
    by_lot: BTreeMap<LotId, BTreeSet<StockRecordId>>,
}

impl LedgerTables {
    pub fn cell(&self, id: CellId) -> DomainResult<&Cell> {
        self.cells.get(&id).ok_or_else(|| DomainError::not_found("cell", id))
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> DomainResult<&mut Cell> {
        self.cells.get_mut(&id).ok_or_else(|| DomainError::not_found("cell", id))
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub(crate) fn insert_cell(&mut self, cell: Cell) -> DomainResult<()> {
        let id = *cell.id();
        if self.cells.contains_key(&id) {
            return Err(DomainError::validation(format!("cell {id} already exists")));
        }
        self.cells.insert(id, cell);
        Ok(())
    }

    pub(crate) fn remove_cell(&mut self, id: CellId) -> DomainResult<Cell> {
        self.cells.remove(&id).ok_or_else(|| DomainError::not_found("cell", id))
    }

    pub fn stock(&self, id: StockRecordId) -> DomainResult<&StockRecord> {
        self.stock
            .get(&id)
            .ok_or_else(|| DomainError::not_found("stock record", id))
    }

    pub(crate) fn stock_mut(&mut self, id: StockRecordId) -> DomainResult<&mut StockRecord> {
        self.stock
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("stock record", id))
    }

    /// Records never change cell or lot, so the indexes only grow.
    pub(crate) fn insert_stock(&mut self, record: StockRecord) {
        let id = *record.id();
        self.by_cell.entry(record.cell_id()).or_default().insert(id);
        self.by_lot.entry(record.lot_id()).or_default().insert(id);
        self.stock.insert(id, record);
    }

    pub fn stock_records(&self) -> impl Iterator<Item = &StockRecord> {
        self.stock.values()
    }

    pub fn stock_in_cell(&self, cell_id: CellId) -> impl Iterator<Item = &StockRecord> {
        self.indexed(self.by_cell.get(&cell_id))
    }

    pub fn stock_for_lot(&self, lot_id: LotId) -> impl Iterator<Item = &StockRecord> {
        self.indexed(self.by_lot.get(&lot_id))
    }

    fn indexed<'a>(
        &'a self,
        ids: Option<&'a BTreeSet<StockRecordId>>,
    ) -> impl Iterator<Item = &'a StockRecord> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.stock.get(id))
    }
}

/// Entry orders, their lots and the audit trail.
#[derive(Debug, Clone, Default)]
pub struct LotTables {
    entry_orders: BTreeMap<EntryOrderId, EntryOrder>,
    lots: BTreeMap<LotId, ProductLot>,
    audits: Vec<AuditRecord>,
}

impl LotTables {
    pub fn entry_order(&self, id: EntryOrderId) -> DomainResult<&EntryOrder> {
        self.entry_orders
            .get(&id)
            .ok_or_else(|| DomainError::not_found("entry order", id))
    }

    pub(crate) fn entry_order_mut(&mut self, id: EntryOrderId) -> DomainResult<&mut EntryOrder> {
        self.entry_orders
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("entry order", id))
    }

    pub fn lot(&self, id: LotId) -> DomainResult<&ProductLot> {
        self.lots.get(&id).ok_or_else(|| DomainError::not_found("product lot", id))
    }

    pub(crate) fn lot_mut(&mut self, id: LotId) -> DomainResult<&mut ProductLot> {
        self.lots
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("product lot", id))
    }

    pub fn lots(&self) -> impl Iterator<Item = &ProductLot> {
        self.lots.values()
    }

    /// Register an entry order with all of its lots. Ids must be new.
    pub(crate) fn insert_entry_order(&mut self, order: EntryOrder, lots: Vec<ProductLot>) -> DomainResult<()> {
        let order_id = *order.id();
        if self.entry_orders.contains_key(&order_id) {
            return Err(DomainError::validation(format!(
                "entry order {order_id} already exists"
            )));
        }
        for lot in &lots {
            if self.lots.contains_key(lot.id()) {
                return Err(DomainError::validation(format!(
                    "product lot {} already exists",
                    lot.id()
                )));
            }
        }
        self.entry_orders.insert(order_id, order);
        for lot in lots {
            self.lots.insert(*lot.id(), lot);
        }
        Ok(())
    }

    pub fn lots_of_order(&self, order_id: EntryOrderId) -> DomainResult<Vec<&ProductLot>> {
        self.entry_order(order_id)?
            .lot_ids()
            .iter()
            .map(|id| self.lot(*id))
            .collect()
    }

    pub(crate) fn push_audit(&mut self, record: AuditRecord) {
        self.audits.push(record);
    }

    pub fn audits_for(&self, lot_id: LotId) -> impl Iterator<Item = &AuditRecord> {
        self.audits.iter().filter(move |a| a.lot_id() == lot_id)
    }
}

/// Departure requests and the allocation ledger.
#[derive(Debug, Clone, Default)]
pub struct DepartureTables {
    requests: BTreeMap<DepartureRequestId, DepartureRequest>,
    allocations: Vec<Allocation>,
}

impl DepartureTables {
    pub fn request(&self, id: DepartureRequestId) -> DomainResult<&DepartureRequest> {
        self.requests
            .get(&id)
            .ok_or_else(|| DomainError::not_found("departure request", id))
    }

    pub(crate) fn request_mut(&mut self, id: DepartureRequestId) -> DomainResult<&mut DepartureRequest> {
        self.requests
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("departure request", id))
    }

    pub(crate) fn insert_request(&mut self, request: DepartureRequest) {
        self.requests.insert(request.id_typed(), request);
    }

    /// Allocations are append-only.
    pub(crate) fn push_allocation(&mut self, allocation: Allocation) {
        self.allocations.push(allocation);
    }

    pub fn allocations_for(&self, request_id: DepartureRequestId) -> impl Iterator<Item = &Allocation> {
        self.allocations
            .iter()
            .filter(move |a| a.request_id() == request_id)
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }
}

/// Every table the engine owns.
///
/// Outside this crate the tables are read-only; writes go through the
/// ledger, audit and fulfillment services.
#[derive(Debug, Clone, Default)]
pub struct WarehouseState {
    pub(crate) ledger: LedgerTables,
    pub(crate) lots: LotTables,
    pub(crate) departures: DepartureTables,
}

impl WarehouseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &LedgerTables {
        &self.ledger
    }

    pub fn lots(&self) -> &LotTables {
        &self.lots
    }

    pub fn departures(&self) -> &DepartureTables {
        &self.departures
    }

    /// Cross-table consistency over every table: entity invariants, cell
    /// usage equal to the footprints placed in it, and no lot placed beyond
    /// its quantity.
    pub fn check_invariants(&self) -> DomainResult<()> {
        for cell in self.ledger.cells() {
            self.check_cell(cell)?;
        }
        for record in self.ledger.stock_records() {
            record.check_invariants()?;
        }
        for lot in self.lots.lots() {
            self.check_lot(lot)?;
        }
        Ok(())
    }

    /// The same checks limited to the given records and the cells and lots
    /// they belong to. Cost grows with the records touched, not the tables.
    pub fn check_invariants_around(
        &self,
        records: impl IntoIterator<Item = StockRecordId>,
    ) -> DomainResult<()> {
        let mut cells = BTreeSet::new();
        let mut lots = BTreeSet::new();
        for id in records {
            let record = self.ledger.stock(id)?;
            record.check_invariants()?;
            cells.insert(record.cell_id());
            lots.insert(record.lot_id());
        }
        for cell_id in cells {
            // A removed cell has nothing left to balance.
            if let Ok(cell) = self.ledger.cell(cell_id) {
                self.check_cell(cell)?;
            }
        }
        for lot_id in lots {
            self.check_lot(self.lots.lot(lot_id)?)?;
        }
        Ok(())
    }

    fn check_cell(&self, cell: &Cell) -> DomainResult<()> {
        cell.check_invariants()?;
        let placed: i64 = self.ledger.stock_in_cell(*cell.id()).map(|r| r.footprint()).sum();
        if placed != cell.current_usage() {
            return Err(DomainError::invariant(format!(
                "cell {} usage {} but records account for {placed}",
                cell.id(),
                cell.current_usage()
            )));
        }
        Ok(())
    }

    fn check_lot(&self, lot: &ProductLot) -> DomainResult<()> {
        let shelved: i64 = self
            .ledger
            .stock_for_lot(*lot.id())
            .map(|r| r.initial_quantity())
            .sum();
        if shelved > lot.quantity() {
            return Err(DomainError::invariant(format!(
                "lot {} has {shelved} units shelved against {} received",
                lot.id(),
                lot.quantity()
            )));
        }
        Ok(())
    }
}
