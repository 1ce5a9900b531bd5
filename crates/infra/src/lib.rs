//! Infrastructure layer: transactional store, services, config, publication.
//!
//! Every mutating operation runs inside one [`TransactionalStore::transaction`]
//! and publishes its events only after that transaction commits.

pub mod audit;
pub mod config;
pub mod engine;
pub mod fulfillment;
pub mod ledger;
pub mod planner;
pub mod publisher;
pub mod retry;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use audit::{AuditBatchReport, AuditFailure, AuditService};
pub use config::EngineConfig;
pub use engine::{Engine, InMemoryEngine};
pub use fulfillment::{BatchDispatchEntry, BatchDispatchReport, DispatchOutcome, FulfillmentService};
pub use ledger::Ledger;
pub use planner::{AllocationPlanner, DispatchPlan, LinePlan};
pub use publisher::{EventPublisher, JsonEnvelope, Outbox};
pub use retry::RetryPolicy;
pub use store::{InMemoryWarehouseStore, StoreError, TransactionalStore, WarehouseState};
