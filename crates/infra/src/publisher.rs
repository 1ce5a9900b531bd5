//! Post-commit event publication.
//!
//! Transactions collect envelopes into an [`Outbox`]; the services hand the
//! outbox to [`EventPublisher::publish_all`] only after the transaction has
//! committed. Rolled-back work therefore never reaches the bus.

use serde::Serialize;
use serde_json::Value as JsonValue;

use stockroom_core::{AggregateId, DomainError, DomainResult};
use stockroom_departures::DepartureEvent;
use stockroom_events::{Event, EventBus, EventEnvelope};
use stockroom_inventory::InventoryEvent;

pub type JsonEnvelope = EventEnvelope<JsonValue>;

/// Envelopes produced inside one transaction, in emission order.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    envelopes: Vec<JsonEnvelope>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<E>(
        &mut self,
        aggregate_id: impl Into<AggregateId>,
        aggregate_type: &str,
        sequence_number: u64,
        event: &E,
    ) -> DomainResult<()>
    where
        E: Event + Serialize,
    {
        let envelope = JsonEnvelope::from_typed(aggregate_id, aggregate_type, sequence_number, event)
            .map_err(|e| DomainError::invariant(format!("failed to encode {}: {e}", event.event_type())))?;
        self.envelopes.push(envelope);
        Ok(())
    }

    /// Record an inventory event against the entity it describes, at that
    /// entity's post-change revision.
    pub fn inventory(&mut self, event: InventoryEvent, revision: u64) -> DomainResult<()> {
        let (aggregate_id, aggregate_type) = event.subject();
        self.push(aggregate_id, aggregate_type, revision, &event)
    }

    /// Record departure events. `version` is the request version after the
    /// last of `events` was applied.
    pub fn departure(
        &mut self,
        aggregate_id: impl Into<AggregateId>,
        version: u64,
        events: &[DepartureEvent],
    ) -> DomainResult<()> {
        let aggregate_id = aggregate_id.into();
        let first = version + 1 - events.len() as u64;
        for (offset, event) in events.iter().enumerate() {
            self.push(aggregate_id, "departures.request", first + offset as u64, event)?;
        }
        Ok(())
    }

    pub fn extend(&mut self, other: Outbox) {
        self.envelopes.extend(other.envelopes);
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn into_envelopes(self) -> Vec<JsonEnvelope> {
        self.envelopes
    }
}

/// Publishes committed outboxes on the injected bus.
#[derive(Debug, Clone)]
pub struct EventPublisher<B> {
    bus: B,
}

impl<B> EventPublisher<B>
where
    B: EventBus<JsonEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Publish every envelope. The state change is already committed, so a
    /// failing bus is logged and the remaining envelopes are still attempted.
    /// Returns how many envelopes were delivered.
    pub fn publish_all(&self, outbox: Outbox) -> usize {
        let mut delivered = 0;
        for envelope in outbox.into_envelopes() {
            let event_type = envelope.event_type().to_string();
            let aggregate_id = envelope.aggregate_id();
            match self.bus.publish(envelope) {
                Ok(()) => delivered += 1,
                Err(error) => tracing::error!(
                    %event_type,
                    %aggregate_id,
                    ?error,
                    "failed to publish committed event"
                ),
            }
        }
        delivered
    }
}
