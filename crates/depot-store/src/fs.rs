//! Directory-backed object store.
//!
//! Layout: `<root>/<first byte as hex>/<full hex id>`. Objects are first
//! written below `<root>/.tmp/` and atomically renamed into place.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use depot_crypto::{ContentHasher, HashingWriter};
use depot_types::ObjectId;
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{not_found_as, InsertHook, ObjectStore};

/// Name of the temporary directory inside the store root.
pub const TMP_DIR: &str = ".tmp";

/// Buffers below this size are hashed in memory (1 MiB).
pub const DEFAULT_SMALL_OBJECT_THRESHOLD: u64 = 1024 * 1024;

/// Object store keeping one file per object below a root directory.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    small_object_threshold: u64,
}

impl FsObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            small_object_threshold: DEFAULT_SMALL_OBJECT_THRESHOLD,
        })
    }

    /// Override the size below which files are read fully into memory.
    pub fn with_small_object_threshold(mut self, threshold: u64) -> Self {
        self.small_object_threshold = threshold;
        self
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of an object (whether or not it exists).
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.shard()).join(id.to_hex())
    }

    fn temp_file(&self) -> StoreResult<NamedTempFile> {
        let tmp = self.root.join(TMP_DIR);
        match NamedTempFile::new_in(&tmp) {
            Ok(f) => Ok(f),
            // The temp dir may have been removed by an archive repack or a
            // manual cleanup; recreate it once.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&tmp)?;
                Ok(NamedTempFile::new_in(&tmp)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a fully written temporary file to its final name.
    fn publish(&self, id: &ObjectId, tmp: NamedTempFile) -> StoreResult<()> {
        let target = self.object_path(id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                trace!(object = %id, "published object");
                Ok(())
            }
            // Another writer published identical content first.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn insert_bytes(&self, data: &[u8], hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        let id = ContentHasher::hash(data);
        hook.on_insert(&id)?;
        if self.exists(&id)? {
            return Ok(id);
        }
        let mut tmp = self.temp_file()?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        self.publish(&id, tmp)?;
        Ok(id)
    }

    fn insert_reader(
        &self,
        reader: &mut dyn Read,
        hook: &dyn InsertHook,
    ) -> StoreResult<ObjectId> {
        let tmp = self.temp_file()?;
        let mut writer = HashingWriter::new(BufWriter::new(tmp));
        io::copy(reader, &mut writer)?;
        let (buffered, id) = writer.finish();
        let tmp = buffered.into_inner().map_err(|e| e.into_error())?;

        hook.on_insert(&id)?;
        if self.exists(&id)? {
            // Dropping the temp file deletes it.
            return Ok(id);
        }
        tmp.as_file().sync_data()?;
        self.publish(&id, tmp)?;
        Ok(id)
    }

    fn insert_verified(
        &self,
        reader: &mut dyn Read,
        expected: &ObjectId,
        hook: &dyn InsertHook,
    ) -> StoreResult<bool> {
        let tmp = self.temp_file()?;
        let mut writer = HashingWriter::new(BufWriter::new(tmp));
        io::copy(reader, &mut writer)?;
        let (buffered, computed) = writer.finish();
        let tmp = buffered.into_inner().map_err(|e| e.into_error())?;
        if computed != *expected {
            return Err(StoreError::Corrupt {
                id: *expected,
                computed,
            });
        }

        hook.on_insert(expected)?;
        if self.exists(expected)? {
            return Ok(false);
        }
        tmp.as_file().sync_data()?;
        self.publish(expected, tmp)?;
        Ok(true)
    }

    fn insert_file(&self, path: &Path, hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        let len = fs::metadata(path)?.len();
        if len < self.small_object_threshold {
            let data = fs::read(path)?;
            self.insert_bytes(&data, hook)
        } else {
            debug!(path = %path.display(), len, "streaming large object");
            let mut file = File::open(path)?;
            self.insert_reader(&mut file, hook)
        }
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn open(&self, id: &ObjectId) -> StoreResult<Box<dyn Read + Send>> {
        let file = File::open(self.object_path(id)).map_err(|e| not_found_as(id, e))?;
        Ok(Box::new(file))
    }

    fn locate(&self, id: &ObjectId) -> StoreResult<Option<PathBuf>> {
        let path = self.object_path(id);
        Ok(path.is_file().then_some(path))
    }

    fn verify(&self, id: &ObjectId) -> StoreResult<()> {
        let file = File::open(self.object_path(id)).map_err(|e| not_found_as(id, e))?;
        let (computed, _) = ContentHasher::hash_reader(file)?;
        if computed != *id {
            return Err(StoreError::Corrupt {
                id: *id,
                computed,
            });
        }
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> StoreResult<bool> {
        match fs::remove_file(self.object_path(id)) {
            Ok(()) => {
                trace!(object = %id, "removed object");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || e.file_name() != TMP_DIR);
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if let Ok(id) = name.parse::<ObjectId>() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NoHook;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<ObjectId>>);

    impl InsertHook for Recording {
        fn on_insert(&self, id: &ObjectId) -> StoreResult<()> {
            self.0.lock().unwrap().push(*id);
            Ok(())
        }
    }

    struct Refuse;

    impl InsertHook for Refuse {
        fn on_insert(&self, id: &ObjectId) -> StoreResult<()> {
            Err(StoreError::Rejected {
                id: *id,
                reason: "no transaction".into(),
            })
        }
    }

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path().join("objects")).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_and_read_back() {
        let (_dir, store) = store();
        let id = store.insert_bytes(b"hello world", &NoHook).unwrap();
        assert_eq!(id, ContentHasher::hash(b"hello world"));
        assert!(store.exists(&id).unwrap());
        assert_eq!(store.read(&id).unwrap(), b"hello world");
    }

    #[test]
    fn layout_is_sharded_by_first_byte() {
        let (_dir, store) = store();
        let id = store.insert_bytes(b"layout", &NoHook).unwrap();
        let path = store.locate(&id).unwrap().unwrap();
        assert_eq!(path, store.root().join(id.shard()).join(id.to_hex()));
    }

    #[test]
    fn insert_twice_stores_once() {
        let (_dir, store) = store();
        let id1 = store.insert_bytes(b"same", &NoHook).unwrap();
        let id2 = store.insert_bytes(b"same", &NoHook).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.list().unwrap(), vec![id1]);
    }

    #[test]
    fn stream_and_buffer_agree() {
        let (_dir, store) = store();
        let data = vec![0x5au8; 300_000];
        let streamed = store.insert_reader(&mut data.as_slice(), &NoHook).unwrap();
        assert_eq!(streamed, ContentHasher::hash(&data));
        assert_eq!(store.read(&streamed).unwrap(), data);
    }

    #[test]
    fn large_file_is_streamed() {
        let (dir, store) = store();
        let store = store.with_small_object_threshold(16);
        let path = dir.path().join("big");
        fs::write(&path, vec![1u8; 4096]).unwrap();
        let id = store.insert_file(&path, &NoHook).unwrap();
        assert_eq!(id, ContentHasher::hash(&[1u8; 4096]));
        store.verify(&id).unwrap();
        // no leftovers in the temp directory
        assert_eq!(fs::read_dir(store.root().join(TMP_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn hook_sees_duplicates_too() {
        let (_dir, store) = store();
        let hook = Recording(Mutex::new(Vec::new()));
        let id = store.insert_bytes(b"dup", &hook).unwrap();
        store.insert_bytes(b"dup", &hook).unwrap();
        assert_eq!(*hook.0.lock().unwrap(), vec![id, id]);
    }

    #[test]
    fn rejecting_hook_prevents_publish() {
        let (_dir, store) = store();
        let err = store.insert_bytes(b"refused", &Refuse).unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(store.list().unwrap().is_empty());

        let err = store
            .insert_reader(&mut &b"refused stream"[..], &Refuse)
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn verify_detects_corruption() {
        let (_dir, store) = store();
        let id = store.insert_bytes(b"pristine", &NoHook).unwrap();
        fs::write(store.object_path(&id), b"tampered").unwrap();
        let err = store.verify(&id).unwrap_err();
        assert!(err.is_corruption());
        match err {
            StoreError::Corrupt { computed, .. } => {
                assert_eq!(computed, ContentHasher::hash(b"tampered"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_dir, store) = store();
        let id = ContentHasher::hash(b"never written");
        assert!(!store.exists(&id).unwrap());
        assert!(matches!(store.open(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.verify(&id), Err(StoreError::NotFound(_))));
        assert!(store.locate(&id).unwrap().is_none());
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, store) = store();
        let id = store.insert_bytes(b"gone", &NoHook).unwrap();
        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(!store.exists(&id).unwrap());
    }

    #[test]
    fn list_ignores_foreign_files() {
        let (_dir, store) = store();
        let a = store.insert_bytes(b"a", &NoHook).unwrap();
        let b = store.insert_bytes(b"b", &NoHook).unwrap();
        fs::write(store.root().join(a.shard()).join("README"), b"x").unwrap();
        fs::write(store.root().join(TMP_DIR).join(a.to_hex()), b"x").unwrap();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn remove_all_collects_results() {
        let (_dir, store) = store();
        let a = store.insert_bytes(b"a", &NoHook).unwrap();
        let missing = ContentHasher::hash(b"missing");
        let report = store.remove_all(&[a, missing]);
        assert_eq!(report.removed, vec![a]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn verified_insert_checks_before_publishing() {
        let (_dir, store) = store();
        let expected = ContentHasher::hash(b"payload");
        assert!(store
            .insert_verified(&mut &b"payload"[..], &expected, &NoHook)
            .unwrap());
        assert!(!store
            .insert_verified(&mut &b"payload"[..], &expected, &NoHook)
            .unwrap());

        // A truncated copy hashes to the empty blob, which is already stored.
        let empty = store.insert_bytes(b"", &NoHook).unwrap();
        let other = ContentHasher::hash(b"other");
        let err = store
            .insert_verified(&mut &b""[..], &other, &NoHook)
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id, computed } if id == other && computed == empty));
        assert!(store.exists(&empty).unwrap());
        assert!(!store.exists(&other).unwrap());
        assert_eq!(fs::read_dir(store.root().join(TMP_DIR)).unwrap().count(), 0);
    }
}
