//! Execution engine for serverflow workflow definitions.
//!
//! `workflow` turns definitions into executor trees and runs instances of
//! them; `event` correlates published events with listening tasks. The
//! crate performs no I/O of its own: outbound calls and event transport sit
//! behind the `CallHandler`, `EventConsumer` and `EventPublisher` traits,
//! implemented by `serverflow-infra` (HTTP) or the in-memory broker here.

pub mod event;
pub mod workflow;
