//! Event correlation: the consumer/publisher contract and an in-memory broker.
//!
//! - `consumer` -- `EventConsumer`/`EventPublisher` traits, registrations, filter matching
//! - `broker` -- `InMemoryEventBroker`, a DashMap-backed implementation of both traits
//! - `scoped` -- `ScopedEventConsumer`, one application's view of a shared consumer

pub mod broker;
pub mod consumer;
pub mod scoped;

pub use broker::InMemoryEventBroker;
pub use scoped::ScopedEventConsumer;
pub use consumer::{
    EventConsumer, EventPredicate, EventPublisher, Registration, RegistrationBuilder,
    RegistrationGuard,
};
