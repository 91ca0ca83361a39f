use std::io::Read;
use std::path::{Path, PathBuf};

use depot_types::ObjectId;
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Observer notified of every insert before the object becomes visible.
///
/// The transaction layer uses this to record an id in its marker store
/// *before* the object is published or deduplicated, which is what keeps a
/// concurrent collector from deleting it. Returning an error aborts the
/// insert.
pub trait InsertHook: Send + Sync {
    fn on_insert(&self, id: &ObjectId) -> StoreResult<()>;
}

/// Hook that records nothing. Used outside of transactions (pool moves,
/// unpooling, tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHook;

impl InsertHook for NoHook {
    fn on_insert(&self, _id: &ObjectId) -> StoreResult<()> {
        Ok(())
    }
}

/// Outcome of a best-effort batch removal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Objects that were deleted.
    pub removed: Vec<ObjectId>,
    /// Objects that were not removed this pass, with the reason.
    pub failed: Vec<(ObjectId, String)>,
}

impl RemovalReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: RemovalReport) {
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
    }
}

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. The same bytes always produce the
///   same id, and inserting an existing object is a no-op.
/// - The hook passed to an insert runs after the id is known and before the
///   existence check, whether or not the bytes end up being written.
/// - Concurrent reads are always safe (objects are immutable).
/// - The store never interprets object contents.
pub trait ObjectStore: Send + Sync {
    /// Insert an in-memory buffer.
    fn insert_bytes(&self, data: &[u8], hook: &dyn InsertHook) -> StoreResult<ObjectId>;

    /// Insert everything a reader yields, hashing while streaming.
    fn insert_reader(&self, reader: &mut dyn Read, hook: &dyn InsertHook)
        -> StoreResult<ObjectId>;

    /// Insert a copy of `expected` read from `reader`.
    ///
    /// The bytes are hashed before anything becomes visible. If they do not
    /// hash to `expected` the insert fails with [`StoreError::Corrupt`] and
    /// the store is left untouched. Returns `true` if the object was written,
    /// `false` if the store already held it.
    fn insert_verified(
        &self,
        reader: &mut dyn Read,
        expected: &ObjectId,
        hook: &dyn InsertHook,
    ) -> StoreResult<bool> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let computed = depot_crypto::ContentHasher::hash(&data);
        if computed != *expected {
            return Err(StoreError::Corrupt {
                id: *expected,
                computed,
            });
        }
        if self.exists(expected)? {
            hook.on_insert(expected)?;
            return Ok(false);
        }
        self.insert_bytes(&data, hook)?;
        Ok(true)
    }

    /// Insert the contents of an existing file.
    fn insert_file(&self, path: &Path, hook: &dyn InsertHook) -> StoreResult<ObjectId>;

    /// Check whether an object exists.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Open a stream over an object's bytes.
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    fn open(&self, id: &ObjectId) -> StoreResult<Box<dyn Read + Send>>;

    /// Path of the file backing an object, if it exists.
    fn locate(&self, id: &ObjectId) -> StoreResult<Option<PathBuf>>;

    /// Recompute the digest of a stored object and compare it to `id`.
    ///
    /// Returns [`StoreError::Corrupt`] on mismatch.
    fn verify(&self, id: &ObjectId) -> StoreResult<()>;

    /// Delete an object. Returns `true` if the object existed.
    ///
    /// Intended for collection only. Removing a referenced object damages
    /// every manifest that reaches it.
    fn remove(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Enumerate every object held by this store.
    fn list(&self) -> StoreResult<Vec<ObjectId>>;

    /// Read a whole object into memory.
    fn read(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        let mut reader = self.open(id)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Remove many objects, collecting failures instead of stopping at the
    /// first one.
    fn remove_all(&self, ids: &[ObjectId]) -> RemovalReport {
        let mut report = RemovalReport::default();
        for id in ids {
            match self.remove(id) {
                Ok(true) => report.removed.push(*id),
                Ok(false) => {}
                Err(e) => {
                    warn!(object = %id, error = %e, "failed to remove object, will retry on a later pass");
                    report.failed.push((*id, e.to_string()));
                }
            }
        }
        report
    }
}

/// Map an `io::ErrorKind::NotFound` into [`StoreError::NotFound`].
pub(crate) fn not_found_as(id: &ObjectId, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(*id)
    } else {
        StoreError::Io(err)
    }
}
