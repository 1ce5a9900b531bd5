//! Engine wiring: one store, one bus, one policy shared by every service.

use std::sync::Arc;

use stockroom_auth::RolePolicy;
use stockroom_events::{EventBus, InMemoryEventBus, Subscription};

use crate::audit::AuditService;
use crate::config::EngineConfig;
use crate::fulfillment::FulfillmentService;
use crate::ledger::Ledger;
use crate::planner::AllocationPlanner;
use crate::publisher::{EventPublisher, JsonEnvelope};
use crate::store::{InMemoryWarehouseStore, TransactionalStore};

pub type InMemoryEngine = Engine<Arc<InMemoryWarehouseStore>, Arc<InMemoryEventBus<JsonEnvelope>>>;

#[derive(Debug, Clone)]
pub struct Engine<S, B> {
    pub ledger: Ledger<S, B>,
    pub planner: AllocationPlanner<S>,
    pub audits: AuditService<S, B>,
    pub fulfillment: FulfillmentService<S, B>,
    store: S,
    bus: B,
}

impl<S, B> Engine<S, B>
where
    S: TransactionalStore + Clone,
    B: EventBus<JsonEnvelope> + Clone,
{
    pub fn new(store: S, bus: B, policy: RolePolicy, config: &EngineConfig) -> Self {
        let publisher = EventPublisher::new(bus.clone());
        tracing::info!(
            dispatch_max_attempts = config.dispatch_max_attempts,
            tx_timeout_ms = config.tx_timeout_ms,
            "inventory engine starting"
        );
        Self {
            ledger: Ledger::new(store.clone(), publisher.clone(), policy.clone()),
            planner: AllocationPlanner::new(store.clone()),
            audits: AuditService::new(store.clone(), publisher.clone(), policy.clone()),
            fulfillment: FulfillmentService::new(store.clone(), publisher, policy, config.retry_policy()),
            store,
            bus,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self) -> Subscription<JsonEnvelope> {
        self.bus.subscribe()
    }
}

impl InMemoryEngine {
    /// Engine over the in-memory store and bus with the default role policy.
    pub fn in_memory(config: &EngineConfig) -> Self {
        let store = Arc::new(InMemoryWarehouseStore::new(config.tx_timeout()));
        let bus = Arc::new(InMemoryEventBus::new());
        Self::new(store, bus, RolePolicy::default(), config)
    }
}
