use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Settings for a reorganization run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Objects referenced by at least this many repositories move to the
    /// pool.
    pub usage_threshold: usize,
    /// Local removals are flushed once this many are pending.
    pub removal_batch_size: usize,
    /// Threads used to copy objects into the pool.
    pub worker_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            usage_threshold: 2,
            removal_batch_size: 1000,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl PoolConfig {
    pub fn with_threshold(usage_threshold: usize) -> Self {
        Self {
            usage_threshold,
            ..Default::default()
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> PoolResult<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| PoolError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.usage_threshold, 2);
        assert_eq!(config.removal_batch_size, 1000);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        fs::write(&path, "usage_threshold = 5\n").unwrap();
        let config = PoolConfig::load(&path).unwrap();
        assert_eq!(config.usage_threshold, 5);
        assert_eq!(config.removal_batch_size, 1000);
    }
}
