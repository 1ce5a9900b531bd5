use std::sync::RwLock;
use std::time::{Duration, Instant};

use stockroom_core::DomainResult;

use super::state::WarehouseState;
use super::{StoreError, TransactionalStore};

/// In-memory warehouse store.
///
/// Intended for tests/dev. A transaction takes the write lock, works on a
/// clone of the tables and swaps it in on success, so a failed or timed-out
/// transaction leaves the committed state untouched.
#[derive(Debug)]
pub struct InMemoryWarehouseStore {
    state: RwLock<WarehouseState>,
    tx_timeout: Duration,
}

impl InMemoryWarehouseStore {
    pub fn new(tx_timeout: Duration) -> Self {
        Self::with_state(WarehouseState::new(), tx_timeout)
    }

    pub fn with_state(state: WarehouseState, tx_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(state),
            tx_timeout,
        }
    }

    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }
}

impl Default for InMemoryWarehouseStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TransactionalStore for InMemoryWarehouseStore {
    fn read<R>(&self, f: impl FnOnce(&WarehouseState) -> DomainResult<R>) -> DomainResult<R> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        f(&state)
    }

    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut WarehouseState) -> DomainResult<R>,
    ) -> DomainResult<R> {
        let started = Instant::now();
        let mut committed = self.state.write().map_err(|_| StoreError::Poisoned)?;

        let mut working = committed.clone();
        let out = f(&mut working)?;

        let elapsed = started.elapsed();
        if elapsed > self.tx_timeout {
            tracing::warn!(?elapsed, limit = ?self.tx_timeout, "transaction timed out; rolled back");
            return Err(StoreError::Timeout {
                elapsed,
                limit: self.tx_timeout,
            }
            .into());
        }

        *committed = working;
        Ok(out)
    }
}
