//! Client configuration.
//!
//! The library persists nothing. Host applications embed [`ClientConfig`] in
//! their own settings (it deserializes with defaults for missing fields) and
//! hand it to the pipelines at construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of messages decrypted concurrently in a batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 16;

/// Default attachment size limit (64 MiB).
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its valid range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why the value was rejected
        reason: &'static str,
    },
}

/// Tunables for the send and receive pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on concurrently running decryptions in a batch.
    pub batch_concurrency: usize,

    /// Largest attachment accepted for sending, and largest encrypted blob
    /// accepted when fetching, in bytes.
    pub max_media_bytes: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { batch_concurrency: DEFAULT_BATCH_CONCURRENCY, max_media_bytes: DEFAULT_MAX_MEDIA_BYTES }
    }
}

impl ClientConfig {
    /// Check that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_concurrency",
                reason: "must be at least 1",
            });
        }
        if self.max_media_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_media_bytes",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}
