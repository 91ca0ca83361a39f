//! Object store that shares content with a pool.
//!
//! Reads fall through from the repository's own store to the shared pool.
//! Inserts only consult the local store: an object that happens to be pooled
//! is still written locally while its transaction is open, so a pool sweep
//! can never delete content a writer has just deduplicated against. The next
//! reorganization moves the duplicate back into the pool.

use std::io::Read;
use std::path::{Path, PathBuf};

use depot_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::fs::FsObjectStore;
use crate::traits::{InsertHook, ObjectStore};

/// A repository-local store layered over a shared pool.
#[derive(Clone, Debug)]
pub struct PooledObjectStore {
    local: FsObjectStore,
    pool: FsObjectStore,
}

impl PooledObjectStore {
    pub fn new(local: FsObjectStore, pool: FsObjectStore) -> Self {
        Self { local, pool }
    }

    /// The repository's own store.
    pub fn local(&self) -> &FsObjectStore {
        &self.local
    }

    /// The shared pool.
    pub fn pool(&self) -> &FsObjectStore {
        &self.pool
    }
}

impl ObjectStore for PooledObjectStore {
    fn insert_bytes(&self, data: &[u8], hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        self.local.insert_bytes(data, hook)
    }

    fn insert_reader(
        &self,
        reader: &mut dyn Read,
        hook: &dyn InsertHook,
    ) -> StoreResult<ObjectId> {
        self.local.insert_reader(reader, hook)
    }

    fn insert_verified(
        &self,
        reader: &mut dyn Read,
        expected: &ObjectId,
        hook: &dyn InsertHook,
    ) -> StoreResult<bool> {
        self.local.insert_verified(reader, expected, hook)
    }

    fn insert_file(&self, path: &Path, hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        self.local.insert_file(path, hook)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.local.exists(id)? || self.pool.exists(id)?)
    }

    fn open(&self, id: &ObjectId) -> StoreResult<Box<dyn Read + Send>> {
        match self.local.open(id) {
            Err(StoreError::NotFound(_)) => self.pool.open(id),
            other => other,
        }
    }

    fn locate(&self, id: &ObjectId) -> StoreResult<Option<PathBuf>> {
        match self.local.locate(id)? {
            Some(path) => Ok(Some(path)),
            None => self.pool.locate(id),
        }
    }

    fn verify(&self, id: &ObjectId) -> StoreResult<()> {
        if self.local.exists(id)? {
            self.local.verify(id)
        } else {
            self.pool.verify(id)
        }
    }

    /// Only local copies are removed; the pool is maintained by the pool
    /// organizer.
    fn remove(&self, id: &ObjectId) -> StoreResult<bool> {
        self.local.remove(id)
    }

    /// Only objects held locally are listed.
    fn list(&self) -> StoreResult<Vec<ObjectId>> {
        self.local.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NoHook;

    fn pooled() -> (tempfile::TempDir, PooledObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let local = FsObjectStore::open(dir.path().join("local")).unwrap();
        let pool = FsObjectStore::open(dir.path().join("pool")).unwrap();
        (dir, PooledObjectStore::new(local, pool))
    }

    #[test]
    fn reads_fall_through_to_pool() {
        let (_dir, store) = pooled();
        let id = store.pool().insert_bytes(b"shared", &NoHook).unwrap();
        assert!(store.exists(&id).unwrap());
        assert_eq!(store.read(&id).unwrap(), b"shared");
        assert!(store.locate(&id).unwrap().unwrap().starts_with(store.pool().root()));
        store.verify(&id).unwrap();
    }

    #[test]
    fn inserts_land_locally_even_if_pooled() {
        let (_dir, store) = pooled();
        let id = store.pool().insert_bytes(b"shared", &NoHook).unwrap();
        store.insert_bytes(b"shared", &NoHook).unwrap();
        assert!(store.local().exists(&id).unwrap());
        assert_eq!(store.list().unwrap(), vec![id]);
    }

    #[test]
    fn remove_never_touches_pool() {
        let (_dir, store) = pooled();
        let id = store.pool().insert_bytes(b"pooled only", &NoHook).unwrap();
        assert!(!store.remove(&id).unwrap());
        assert!(store.pool().exists(&id).unwrap());
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let (_dir, store) = pooled();
        let id = depot_crypto::ContentHasher::hash(b"nowhere");
        assert!(matches!(store.open(&id), Err(StoreError::NotFound(_))));
    }
}
