//! Ephemeral reference-count index.
//!
//! Built from scratch at the start of every reorganization run in a `.refdb/`
//! directory and deleted when the index is dropped, whether the run
//! succeeded or not. Maps each object id to the repositories that reach it.

use std::fs;
use std::path::{Path, PathBuf};

use depot_types::{ObjectId, OBJECT_ID_LEN};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::error::{PoolError, PoolResult};

/// Directory holding the index while a run is in progress.
pub const REFDB_DIR: &str = ".refdb";
const DB_FILE: &str = "refs.redb";

/// Object id → little-endian `u32` repository numbers.
const REFS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("refs");

/// Deletes the index directory once the database is closed.
#[derive(Debug)]
struct IndexDir(PathBuf);

impl Drop for IndexDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "discarded reference index"),
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to discard reference index"),
        }
    }
}

/// On-disk reference index.
pub struct ReferenceIndex {
    // Declared before `dir` so the database closes before its files are
    // deleted.
    db: Database,
    dir: IndexDir,
}

impl ReferenceIndex {
    /// Create an empty index in `<parent>/.refdb/`, replacing any left over
    /// from an interrupted run. The caller must hold the pool lock, otherwise
    /// the directory may belong to a run still in progress.
    pub fn create(parent: &Path) -> PoolResult<Self> {
        let dir = parent.join(REFDB_DIR);
        if dir.exists() {
            warn!(path = %dir.display(), "removing reference index left by an earlier run");
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        let dir = IndexDir(dir);
        let db = Database::create(dir.0.join(DB_FILE))?;
        let txn = db.begin_write()?;
        txn.open_table(REFS)?;
        txn.commit()?;
        Ok(Self { db, dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir.0
    }

    /// Record `repository` as a referrer of every id in `ids`, in one write
    /// transaction.
    pub fn add_referrer(
        &self,
        repository: u32,
        ids: impl IntoIterator<Item = ObjectId>,
    ) -> PoolResult<usize> {
        let txn = self.db.begin_write()?;
        let mut added = 0;
        {
            let mut table = txn.open_table(REFS)?;
            for id in ids {
                let key = id.as_bytes().as_slice();
                let mut referrers = match table.get(key)? {
                    Some(value) => decode_referrers(value.value())?,
                    None => Vec::new(),
                };
                if referrers.contains(&repository) {
                    continue;
                }
                referrers.push(repository);
                referrers.sort_unstable();
                table.insert(key, encode_referrers(&referrers).as_slice())?;
                added += 1;
            }
        }
        txn.commit()?;
        Ok(added)
    }

    /// Repositories referencing `id`.
    pub fn referrers(&self, id: &ObjectId) -> PoolResult<Vec<u32>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REFS)?;
        let referrers = match table.get(id.as_bytes().as_slice())? {
            Some(value) => decode_referrers(value.value())?,
            None => Vec::new(),
        };
        Ok(referrers)
    }

    pub fn contains(&self, id: &ObjectId) -> PoolResult<bool> {
        Ok(!self.referrers(id)?.is_empty())
    }

    /// Call `f` for every indexed object in id order.
    pub fn visit(&self, mut f: impl FnMut(ObjectId, Vec<u32>) -> PoolResult<()>) -> PoolResult<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REFS)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let id = decode_id(key.value())?;
            f(id, decode_referrers(value.value())?)?;
        }
        Ok(())
    }
}

fn decode_id(bytes: &[u8]) -> PoolResult<ObjectId> {
    let hash: [u8; OBJECT_ID_LEN] = bytes
        .try_into()
        .map_err(|_| PoolError::CorruptIndex(format!("key of {} bytes", bytes.len())))?;
    Ok(ObjectId::from_hash(hash))
}

fn encode_referrers(referrers: &[u32]) -> Vec<u8> {
    referrers.iter().flat_map(|r| r.to_le_bytes()).collect()
}

fn decode_referrers(bytes: &[u8]) -> PoolResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(PoolError::CorruptIndex(format!(
            "referrer list of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
