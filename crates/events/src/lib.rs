//! Event plumbing shared by the ledger and document domains.
//!
//! Events are published only after the store has committed the change they
//! describe, so subscribers never observe a state that was rolled back.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
