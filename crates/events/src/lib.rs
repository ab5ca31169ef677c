//! Domain events and their distribution.
//!
//! Events are the facts persisted by the ledger store; the bus fans committed
//! events out to downstream consumers after a successful append.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
