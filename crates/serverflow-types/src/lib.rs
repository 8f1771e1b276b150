//! Shared domain types for serverflow.
//!
//! This crate contains the types exchanged between the engine, its adapters
//! and the CLI: the workflow definition model, the event envelope, instance
//! and task statuses, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod instance;
pub mod workflow;
