//! Transactional boundary around the warehouse tables.
//!
//! Every mutation in the engine runs inside [`TransactionalStore::transaction`]:
//! the closure sees a working copy of the tables and its writes become visible
//! only if it returns `Ok`. An `Err` (or a timeout) discards every write made
//! by the closure, so no caller ever observes half of a dispatch.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use stockroom_core::{DomainError, DomainResult};

mod in_memory;
mod state;

pub use in_memory::InMemoryWarehouseStore;
pub use state::{DepartureTables, LedgerTables, LotTables, WarehouseState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("transaction exceeded {limit:?} (took {elapsed:?})")]
    Timeout { elapsed: Duration, limit: Duration },
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            // A timed-out transaction was rolled back; callers retry it like a collision.
            StoreError::Timeout { .. } => DomainError::conflict(value.to_string()),
            StoreError::Poisoned => DomainError::invariant(value.to_string()),
        }
    }
}

/// Read-committed access plus all-or-nothing write transactions.
///
/// Writers are serialized, which gives the row-level exclusivity a dispatch
/// needs; optimistic revision checks inside the closures catch plans made
/// against a snapshot that has since moved.
pub trait TransactionalStore: Send + Sync {
    /// Run `f` against the latest committed state.
    fn read<R>(&self, f: impl FnOnce(&WarehouseState) -> DomainResult<R>) -> DomainResult<R>;

    /// Run `f` against a working copy and commit it only if `f` succeeds.
    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut WarehouseState) -> DomainResult<R>,
    ) -> DomainResult<R>;
}

impl<S> TransactionalStore for Arc<S>
where
    S: TransactionalStore,
{
    fn read<R>(&self, f: impl FnOnce(&WarehouseState) -> DomainResult<R>) -> DomainResult<R> {
        (**self).read(f)
    }

    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut WarehouseState) -> DomainResult<R>,
    ) -> DomainResult<R> {
        (**self).transaction(f)
    }
}
