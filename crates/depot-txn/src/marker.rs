//! Per-transaction marker stores.
//!
//! A marker store is a directory `<marker root>/<transaction id>/` holding an
//! `owner.json` record and one empty file per recorded object id.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use depot_types::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TxnError, TxnResult};
use crate::lock::LOCK_FILE;
use crate::process::{is_process_alive, local_host};

const OWNER_FILE: &str = "owner.json";

/// Marker stores without an owner record are considered abandoned after this.
const ORPHAN_GRACE: Duration = Duration::from_secs(60 * 60);

/// Who created a marker store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerOwner {
    pub pid: u32,
    pub host: String,
    pub created: DateTime<Utc>,
}

impl MarkerOwner {
    /// Owner record for the calling process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: local_host(),
            created: Utc::now(),
        }
    }

    /// `true` if the owner is known to be gone: same host, pid not running.
    pub fn is_dead(&self) -> bool {
        self.host == local_host() && !is_process_alive(self.pid)
    }
}

/// The set of objects recorded by one transaction.
#[derive(Clone, Debug)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Create a fresh marker store named `name` below `root`.
    pub fn create(root: &Path, name: &str) -> TxnResult<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        let owner = serde_json::to_vec(&MarkerOwner::current())
            .map_err(|e| TxnError::Serialization(e.to_string()))?;
        fs::write(dir.join(OWNER_FILE), owner)?;
        Ok(Self { dir })
    }

    /// Open an existing marker store directory.
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record an object id. Recording the same id twice is harmless.
    pub fn record(&self, id: &ObjectId) -> TxnResult<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(id.to_hex()))
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every recorded id.
    pub fn ids(&self) -> TxnResult<BTreeSet<ObjectId>> {
        let mut ids = BTreeSet::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// The owner record, if readable.
    pub fn owner(&self) -> Option<MarkerOwner> {
        let data = fs::read(self.dir.join(OWNER_FILE)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// `true` if this store was left behind by a process that no longer runs.
    pub fn is_stale(&self) -> bool {
        match self.owner() {
            Some(owner) => owner.is_dead(),
            None => self.age().is_some_and(|age| age > ORPHAN_GRACE),
        }
    }

    fn age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.dir).and_then(|m| m.modified()).ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    /// Delete the store and everything recorded in it.
    pub fn delete(&self) -> TxnResult<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All marker stores below `root`.
    pub fn list(root: &Path) -> TxnResult<Vec<MarkerStore>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut stores = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_name() == LOCK_FILE || !entry.file_type()?.is_dir() {
                continue;
            }
            stores.push(MarkerStore::at(entry.path()));
        }
        Ok(stores)
    }

    /// Delete stale stores below `root`. The caller must hold the exclusive
    /// marker lock. Returns how many were removed.
    pub fn sweep_stale(root: &Path) -> TxnResult<usize> {
        let mut removed = 0;
        for store in Self::list(root)? {
            if !store.is_stale() {
                continue;
            }
            match store.delete() {
                Ok(()) => {
                    removed += 1;
                    warn!(marker = %store.dir.display(), "removed stale marker store");
                }
                Err(e) => {
                    warn!(marker = %store.dir.display(), error = %e, "failed to remove stale marker store")
                }
            }
        }
        if removed > 0 {
            debug!(removed, "stale marker sweep finished");
        }
        Ok(removed)
    }
}
