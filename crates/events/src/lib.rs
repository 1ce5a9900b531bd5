//! Lifecycle events and the publication boundary.
//!
//! The engine never talks to a broker directly: committed transitions are
//! wrapped in [`EventEnvelope`]s and handed to an injected [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
