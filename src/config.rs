use std::path::Path;

use relay_core::CommandOptions;
use relay_parallel::{ParallelDispatcher, ParallelOptions, PoolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`RelayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for commands and the parallel dispatcher, usually read from a
/// `relay.toml`:
///
/// ```toml
/// [command]
/// allow_concurrent_executions = false
///
/// [parallel]
/// max_parallelism = 4
/// minimum_actions_per_thread = 16
/// ```
///
/// Missing tables and keys fall back to their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub command: CommandOptions,
    pub parallel: ParallelOptions,
}

impl RelayConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(target: "relay::Config", "loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel.minimum_actions_per_thread == 0 {
            return Err(ConfigError::Invalid(
                "parallel.minimum_actions_per_thread must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Dispatcher configured from the `[parallel]` table.
    pub fn dispatcher(&self) -> Result<ParallelDispatcher, PoolError> {
        ParallelDispatcher::from_options(&self.parallel)
    }
}
