//! Repository configuration, read from `<root>/depot.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use depot_store::fs::DEFAULT_SMALL_OBJECT_THRESHOLD;
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// File name of the per-repository configuration.
pub const CONFIG_FILE: &str = "depot.toml";

/// Per-repository settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Buffers smaller than this are hashed in memory before writing.
    pub small_object_threshold: u64,
    /// Size of the worker pool each operation gets.
    pub worker_threads: usize,
    /// Where transaction markers live. Relative paths resolve against the
    /// repository root; unset means `<root>/markers`.
    pub marker_root: Option<PathBuf>,
    /// Shared pool this repository reads through to, if any.
    pub pool: Option<PathBuf>,
    /// Write an audit record for every mutating operation.
    pub audit: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            small_object_threshold: DEFAULT_SMALL_OBJECT_THRESHOLD,
            worker_threads: default_worker_threads(),
            marker_root: None,
            pool: None,
            audit: true,
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RepositoryConfig {
    /// Load `<root>/depot.toml`, falling back to defaults if it is absent.
    pub fn load(root: &Path) -> RepoResult<Self> {
        let path = root.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&text).map_err(|e| RepoError::Config {
            path,
            reason: e.to_string(),
        })
    }

    /// Write this configuration to `<root>/depot.toml`.
    pub fn save(&self, root: &Path) -> RepoResult<()> {
        let path = root.join(CONFIG_FILE);
        let text = toml::to_string_pretty(self).map_err(|e| RepoError::Config {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Marker root for a repository at `root`.
    pub fn marker_root_for(&self, root: &Path) -> PathBuf {
        match &self.marker_root {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join("markers"),
        }
    }

    /// Pool path for a repository at `root`, if one is configured.
    pub fn pool_for(&self, root: &Path) -> Option<PathBuf> {
        self.pool.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        })
    }
}

/// How far and how strictly to scan a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Levels below the root to materialize. Deeper nodes are left
    /// unexpanded.
    pub max_depth: usize,
    /// Represent absent objects as missing nodes instead of failing.
    pub tolerate_missing: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: usize::MAX,
            tolerate_missing: true,
        }
    }
}

impl ScanOptions {
    pub fn depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Default::default()
        }
    }

    pub fn strict(self) -> Self {
        Self {
            tolerate_missing: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepositoryConfig::load(dir.path()).unwrap();
        assert_eq!(config, RepositoryConfig::default());
        assert!(config.worker_threads >= 1);
        assert_eq!(config.marker_root_for(dir.path()), dir.path().join("markers"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "worker_threads = 3\npool = \"../pool\"\n",
        )
        .unwrap();
        let config = RepositoryConfig::load(dir.path()).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.small_object_threshold, DEFAULT_SMALL_OBJECT_THRESHOLD);
        assert_eq!(config.pool_for(dir.path()), Some(dir.path().join("../pool")));
        assert!(config.audit);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepositoryConfig {
            worker_threads: 2,
            audit: false,
            ..Default::default()
        };
        config.save(dir.path()).unwrap();
        assert_eq!(RepositoryConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "worker_threads = \"many\"").unwrap();
        assert!(matches!(
            RepositoryConfig::load(dir.path()),
            Err(RepoError::Config { .. })
        ));
    }
}
