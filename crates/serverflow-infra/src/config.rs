//! Engine configuration loader.
//!
//! Reads `config.toml` from the configuration directory and deserializes it
//! into [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a fresh install runs without any setup.

use std::path::{Path, PathBuf};

use serverflow_types::config::EngineConfig;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolve the configuration directory.
///
/// Priority:
/// 1. `SERVERFLOW_CONFIG_DIR` environment variable
/// 2. Platform config directory (e.g. `~/.config/serverflow` on Linux)
/// 3. `./.serverflow`
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SERVERFLOW_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("serverflow");
    }
    PathBuf::from(".serverflow")
}

/// Strictly load `{config_dir}/config.toml`.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn try_load_engine_config(config_dir: &Path) -> Result<Option<EngineConfig>, ConfigError> {
    let path = config_dir.join(CONFIG_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse { path, source })
}

/// Load engine configuration from `{config_dir}/config.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or malformed file: logs a warning and returns defaults.
pub async fn load_engine_config(config_dir: &Path) -> EngineConfig {
    match try_load_engine_config(config_dir).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!(
                "No {CONFIG_FILE} found in {}, using defaults",
                config_dir.display()
            );
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}
