//! Loader configuration.

use std::num::NonZeroUsize;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Capacity of the chunk buffer reused across reads of one file.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Tunables for a [`crate::Loader`].
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "buffer_size": 65536, "max_file_size": 104857600 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Bytes requested per read call.
    pub buffer_size: usize,
    /// Number of worker threads decoding in parallel.
    pub decode_threads: usize,
    /// Reserve the whole accumulator up-front from the file's metadata.
    pub presize_from_metadata: bool,
    /// Largest file the loader will hold in memory.
    pub max_file_size: Option<u64>,
    /// Apply EXIF orientation in the default decoder.
    pub apply_orientation: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            decode_threads: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            presize_from_metadata: true,
            max_file_size: None,
            apply_orientation: true,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be greater than zero",
            });
        }
        if self.decode_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "decode_threads",
                reason: "must be greater than zero",
            });
        }
        if self.max_file_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_file_size",
                reason: "must be greater than zero when set",
            });
        }
        Ok(())
    }
}
