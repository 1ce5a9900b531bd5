//! Physical storage slots and their occupancy bookkeeping.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stockroom_core::{CellId, DomainError, DomainResult, Entity, ValueObject, WarehouseId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Empty and free.
    Available,
    /// Holds stock (`current_usage > 0`).
    Occupied,
    /// Empty, but held for an expected placement.
    Reserved,
}

/// Position of a cell inside its warehouse. Orders aisle, then bay, then level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoordinate {
    pub aisle: u32,
    pub bay: u32,
    pub level: u32,
}

impl ValueObject for CellCoordinate {}

impl core::fmt::Display for CellCoordinate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{}", self.aisle, self.bay, self.level)
    }
}

/// A storage slot. Capacity is measured in stock units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    id: CellId,
    warehouse_id: WarehouseId,
    coordinate: CellCoordinate,
    capacity: i64,
    current_usage: i64,
    status: CellStatus,
    revision: u64,
}

impl Cell {
    pub fn new(
        id: CellId,
        warehouse_id: WarehouseId,
        coordinate: CellCoordinate,
        capacity: i64,
    ) -> DomainResult<Self> {
        if capacity <= 0 {
            return Err(DomainError::validation("cell capacity must be positive"));
        }
        Ok(Self {
            id,
            warehouse_id,
            coordinate,
            capacity,
            current_usage: 0,
            status: CellStatus::Available,
            revision: 0,
        })
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn coordinate(&self) -> CellCoordinate {
        self.coordinate
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn current_usage(&self) -> i64 {
        self.current_usage
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    pub fn free_capacity(&self) -> i64 {
        self.capacity - self.current_usage
    }

    /// Take `amount` units of capacity for a new stock record.
    pub fn occupy(&mut self, amount: i64) -> DomainResult<()> {
        if amount <= 0 {
            return Err(DomainError::validation("occupied amount must be positive"));
        }
        if self.current_usage + amount > self.capacity {
            return Err(DomainError::CapacityExceeded {
                cell: self.id.to_string(),
                requested: amount,
                available: self.free_capacity(),
            });
        }
        self.current_usage += amount;
        self.status = CellStatus::Occupied;
        self.revision += 1;
        Ok(())
    }

    /// Give back `amount` units of capacity (consumption or depletion).
    pub fn release(&mut self, amount: i64) -> DomainResult<()> {
        if amount < 0 || amount > self.current_usage {
            return Err(DomainError::invariant(format!(
                "cannot release {amount} units from cell {} using {}",
                self.id, self.current_usage
            )));
        }
        if amount == 0 {
            return Ok(());
        }
        self.current_usage -= amount;
        if self.current_usage == 0 {
            self.status = CellStatus::Available;
        }
        self.revision += 1;
        Ok(())
    }

    /// Hold an empty cell for an expected placement.
    pub fn reserve(&mut self) -> DomainResult<()> {
        if self.status != CellStatus::Available {
            return Err(DomainError::invalid_transition(format!(
                "only an available cell can be reserved (cell {} is {:?})",
                self.id, self.status
            )));
        }
        self.status = CellStatus::Reserved;
        self.revision += 1;
        Ok(())
    }

    pub fn unreserve(&mut self) -> DomainResult<()> {
        if self.status != CellStatus::Reserved {
            return Err(DomainError::invalid_transition(format!(
                "cell {} is not reserved",
                self.id
            )));
        }
        self.status = CellStatus::Available;
        self.revision += 1;
        Ok(())
    }

    /// `0 <= usage <= capacity`, occupied iff usage > 0.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.current_usage < 0 || self.current_usage > self.capacity {
            return Err(DomainError::invariant(format!(
                "cell {} usage {} outside 0..={}",
                self.id, self.current_usage, self.capacity
            )));
        }
        let occupied = self.status == CellStatus::Occupied;
        if occupied != (self.current_usage > 0) {
            return Err(DomainError::invariant(format!(
                "cell {} status {:?} disagrees with usage {}",
                self.id, self.status, self.current_usage
            )));
        }
        Ok(())
    }
}

impl Entity for Cell {
    type Id = CellId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// Narrows candidate stock to a warehouse and/or an explicit set of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFilter {
    pub warehouse_id: Option<WarehouseId>,
    pub cells: Option<BTreeSet<CellId>>,
}

impl CellFilter {
    pub fn warehouse(warehouse_id: WarehouseId) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            cells: None,
        }
    }

    pub fn cells(cells: impl IntoIterator<Item = CellId>) -> Self {
        Self {
            warehouse_id: None,
            cells: Some(cells.into_iter().collect()),
        }
    }

    pub fn matches(&self, cell: &Cell) -> bool {
        let warehouse_ok = self
            .warehouse_id
            .is_none_or(|w| w == cell.warehouse_id());
        let cell_ok = self
            .cells
            .as_ref()
            .is_none_or(|set| set.contains(cell.id()));
        warehouse_ok && cell_ok
    }
}
