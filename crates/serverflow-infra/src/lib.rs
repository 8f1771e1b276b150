//! Infrastructure adapters for serverflow.
//!
//! Implements the collaborator traits defined in `serverflow-core` against
//! real services: `http` performs `call` tasks with reqwest, `config` loads
//! the engine configuration from a TOML file.

pub mod config;
pub mod http;

pub use config::{default_config_dir, load_engine_config, ConfigError};
pub use http::HttpCallHandler;
