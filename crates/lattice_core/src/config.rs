//! # Engine Configuration
//!
//! Tunables for chunk storage and the job scheduler, loaded once at startup
//! from a TOML file.
//!
//! ```toml
//! chunk_size_bytes = 16384
//! chunk_alignment = 64
//! initial_entity_capacity = 4096
//! worker_threads = 4
//! ```
//!
//! Every key is optional and falls back to [`EcsConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, EcsResult};

/// Smallest chunk block accepted by [`EcsConfig::validate`].
pub const MIN_CHUNK_SIZE_BYTES: usize = 1024;

/// Storage and scheduling configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcsConfig {
    /// Size of every chunk block in bytes.
    pub chunk_size_bytes: usize,
    /// Alignment of chunk blocks. Raised to the largest component alignment
    /// when an archetype needs more.
    pub chunk_alignment: usize,
    /// Pre-sized capacity of the entity address map.
    pub initial_entity_capacity: usize,
    /// Worker threads started by the job scheduler.
    pub worker_threads: usize,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 16 * 1024,
            chunk_alignment: 64,
            initial_entity_capacity: 1024,
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
        }
    }
}

impl EcsConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] on malformed TOML, unknown keys
    /// or values rejected by [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> EcsResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EcsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the file cannot be read or
    /// does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> EcsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EcsError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> EcsResult<()> {
        if self.chunk_size_bytes < MIN_CHUNK_SIZE_BYTES {
            return Err(EcsError::InvalidConfig(format!(
                "chunk_size_bytes must be at least {MIN_CHUNK_SIZE_BYTES}, got {}",
                self.chunk_size_bytes
            )));
        }
        if !self.chunk_alignment.is_power_of_two() {
            return Err(EcsError::InvalidConfig(format!(
                "chunk_alignment must be a power of two, got {}",
                self.chunk_alignment
            )));
        }
        if self.worker_threads == 0 {
            return Err(EcsError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
