//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` read at startup. Every field
//! has a default so an empty or missing file yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to `call`, `listen` and `wait` tasks that do not
    /// declare their own.
    #[serde(default)]
    pub default_task_timeout_secs: Option<u64>,

    /// How long `close()` waits for cancelled instances to finish.
    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,

    /// Upper bound on any single retry delay, jitter included.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_shutdown_drain_timeout_ms() -> u64 {
    5_000
}

fn default_max_retry_delay_ms() -> u64 {
    300_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_secs: None,
            shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            http: HttpConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Settings for the outbound HTTP call handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("serverflow/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}
