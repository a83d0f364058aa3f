//! Configuration for the data manager.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataMgrError, Result};

/// Configuration for the data manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMgrConfig {
    /// Memory budget for cached regions in megabytes.
    pub mem_size_mb: usize,

    /// Size in bytes of one block of the region memory pool.
    pub pool_block_size: usize,
}

impl Default for DataMgrConfig {
    fn default() -> Self {
        Self {
            mem_size_mb: 1024,
            pool_block_size: 1024 * 1024,
        }
    }
}

impl DataMgrConfig {
    /// Create a configuration with the given memory budget and default pool blocks.
    pub fn with_mem_size_mb(mem_size_mb: usize) -> Self {
        Self {
            mem_size_mb,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATAMGR_MEM_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.mem_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("DATAMGR_POOL_BLOCK_SIZE") {
            if let Ok(size) = val.parse() {
                config.pool_block_size = size;
            }
        }

        config
    }

    /// Parse configuration from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DataMgrError::config_error(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mem_size_mb == 0 {
            return Err(DataMgrError::config_error("mem_size_mb must be > 0"));
        }

        if self.pool_block_size == 0 {
            return Err(DataMgrError::config_error("pool_block_size must be > 0"));
        }

        if self.pool_block_size > self.mem_size_bytes() {
            return Err(DataMgrError::config_error(
                "pool_block_size must not exceed the memory budget",
            ));
        }

        Ok(())
    }

    /// Get the memory budget in bytes.
    pub fn mem_size_bytes(&self) -> usize {
        self.mem_size_mb * 1024 * 1024
    }

    /// Number of pool blocks the budget allows.
    pub fn num_pool_blocks(&self) -> usize {
        self.mem_size_bytes() / self.pool_block_size.max(1)
    }
}
