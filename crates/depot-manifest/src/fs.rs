//! Directory-backed manifest store.
//!
//! Layout: `<root>/<name segments>/<tag>.json`, one small JSON record per key.
//! Records are written to `<root>/.tmp/` and linked into place without
//! clobbering, so two processes racing to add the same key cannot both win.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use depot_types::ManifestKey;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ManifestError, Result};
use crate::manifest::Manifest;
use crate::names::{validate_key, validate_name};
use crate::traits::ManifestStore;

const RECORD_EXT: &str = "json";
const TMP_DIR: &str = ".tmp";

/// Name → tags.
type Listing = BTreeMap<String, BTreeSet<String>>;

/// Manifest store keeping one record file per key.
///
/// Listing results are served from an in-memory cache built on first use and
/// kept current by this instance's `add`/`remove`. Changes made by other
/// processes become visible after [`invalidate`](Self::invalidate); direct
/// lookups (`exists`, `get`) always go to disk.
#[derive(Debug)]
pub struct FsManifestStore {
    root: PathBuf,
    cache: RwLock<Option<Listing>>,
}

impl FsManifestStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            cache: RwLock::new(None),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drop the listing cache; the next listing re-scans the directory.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn record_path(&self, key: &ManifestKey) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.name().split('/') {
            path.push(segment);
        }
        path.push(format!("{}.{RECORD_EXT}", key.tag()));
        path
    }

    fn scan(&self) -> Result<Listing> {
        let mut listing = Listing::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || e.file_name() != TMP_DIR);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // Concurrent removals prune directories while we walk.
                Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(io::Error::from(e).into()),
            };
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|e| e.to_str()) != Some(RECORD_EXT)
            {
                continue;
            }
            match self.key_for_path(entry.path()) {
                Some(key) => {
                    listing
                        .entry(key.name().to_string())
                        .or_default()
                        .insert(key.tag().to_string());
                }
                None => warn!(path = %entry.path().display(), "ignoring stray manifest file"),
            }
        }
        debug!(names = listing.len(), "scanned manifest directory");
        Ok(listing)
    }

    fn key_for_path(&self, path: &Path) -> Option<ManifestKey> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let tag = rel.file_stem()?.to_str()?;
        let name = rel
            .parent()?
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        let key = ManifestKey::new(name, tag);
        validate_key(&key).ok()?;
        Some(key)
    }

    fn with_listing<T>(&self, f: impl FnOnce(&Listing) -> T) -> Result<T> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(listing) = cache.as_ref() {
                return Ok(f(listing));
            }
        }
        // Scan while holding the write lock so an `add` that lands during the
        // scan waits and then updates the installed listing.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let listing = match cache.take() {
            Some(listing) => listing,
            None => self.scan()?,
        };
        let out = f(&listing);
        *cache = Some(listing);
        Ok(out)
    }

    fn update_listing(&self, f: impl FnOnce(&mut Listing)) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(listing) = cache.as_mut() {
            f(listing);
        }
    }

    /// Remove now-empty directories between a removed record and the root.
    fn prune_empty_parents(&self, record: &Path) {
        let mut dir = record.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

impl ManifestStore for FsManifestStore {
    fn add(&self, manifest: &Manifest) -> Result<()> {
        let key = manifest.key();
        validate_key(key)?;
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| ManifestError::Serialization(e.to_string()))?;

        let target = self.record_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = NamedTempFile::new_in(self.root.join(TMP_DIR))?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_data()?;
        match tmp.persist_noclobber(&target) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ManifestError::AlreadyExists(key.clone()))
            }
            Err(e) => return Err(e.error.into()),
        }

        self.update_listing(|listing| {
            listing
                .entry(key.name().to_string())
                .or_default()
                .insert(key.tag().to_string());
        });
        debug!(manifest = %key, root = %manifest.root(), "added manifest");
        Ok(())
    }

    fn exists(&self, key: &ManifestKey) -> Result<bool> {
        validate_key(key)?;
        Ok(self.record_path(key).is_file())
    }

    fn get(&self, key: &ManifestKey) -> Result<Manifest> {
        validate_key(key)?;
        let path = self.record_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound(key.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest =
            serde_json::from_slice(&data).map_err(|e| ManifestError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if manifest.key() != key {
            return Err(ManifestError::Corrupt {
                path,
                reason: format!("record holds {}", manifest.key()),
            });
        }
        Ok(manifest)
    }

    fn remove(&self, key: &ManifestKey) -> Result<bool> {
        validate_key(key)?;
        let path = self.record_path(key);
        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.prune_empty_parents(&path);
        self.update_listing(|listing| {
            if let Some(tags) = listing.get_mut(key.name()) {
                tags.remove(key.tag());
                if tags.is_empty() {
                    listing.remove(key.name());
                }
            }
        });
        if existed {
            debug!(manifest = %key, "removed manifest");
        }
        Ok(existed)
    }

    fn list_all(&self) -> Result<BTreeSet<ManifestKey>> {
        self.with_listing(|listing| {
            listing
                .iter()
                .flat_map(|(name, tags)| tags.iter().map(move |tag| ManifestKey::new(name, tag)))
                .collect()
        })
    }

    fn list_for_name(&self, name: &str) -> Result<BTreeSet<ManifestKey>> {
        validate_name(name)?;
        self.with_listing(|listing| {
            listing
                .range(name.to_string()..)
                .take_while(|(n, _)| n.starts_with(name))
                .flat_map(|(n, tags)| tags.iter().map(move |tag| ManifestKey::new(n, tag)))
                .filter(|key| key.is_in_namespace(name))
                .collect()
        })
    }

    fn refresh_listing(&self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use depot_types::ObjectId;

    fn store() -> (tempfile::TempDir, FsManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsManifestStore::open(dir.path().join("manifests")).unwrap();
        (dir, store)
    }

    fn add(store: &FsManifestStore, name: &str, tag: &str) -> Manifest {
        ManifestBuilder::new(ManifestKey::new(name, tag))
            .root(ObjectId::from_hash([1; 32]))
            .insert(store)
            .unwrap()
    }

    fn keys(set: &BTreeSet<ManifestKey>) -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn add_and_get() {
        let (_dir, store) = store();
        let manifest = add(&store, "app", "1");
        assert!(store.exists(manifest.key()).unwrap());
        assert_eq!(store.get(manifest.key()).unwrap(), manifest);
    }

    #[test]
    fn add_existing_key_is_rejected() {
        let (_dir, store) = store();
        add(&store, "app", "1");
        let other = ManifestBuilder::new(ManifestKey::new("app", "1"))
            .root(ObjectId::from_hash([2; 32]))
            .build()
            .unwrap();
        let err = store.add(&other).unwrap_err();
        assert!(matches!(err, ManifestError::AlreadyExists(_)));
        // the original record is untouched
        let stored = store.get(&ManifestKey::new("app", "1")).unwrap();
        assert_eq!(stored.root(), &ObjectId::from_hash([1; 32]));
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.get(&ManifestKey::new("nope", "1")).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn prefix_listing_includes_namespace() {
        let (_dir, store) = store();
        add(&store, "a", "1");
        add(&store, "a/b", "1");
        add(&store, "a/b/c", "1");
        add(&store, "a-b", "1");
        add(&store, "ab", "1");

        assert_eq!(
            keys(&store.list_for_name("a").unwrap()),
            vec!["a:1", "a/b:1", "a/b/c:1"]
        );
        assert_eq!(
            keys(&store.list_for_name("a/b").unwrap()),
            vec!["a/b:1", "a/b/c:1"]
        );
    }

    #[test]
    fn cache_follows_add_and_remove() {
        let (_dir, store) = store();
        add(&store, "xtest", "1");
        assert_eq!(store.list_all().unwrap().len(), 1);
        add(&store, "xtest/sub", "2");
        assert_eq!(store.list_for_name("xtest").unwrap().len(), 2);
        assert!(store.remove(&ManifestKey::new("xtest", "1")).unwrap());
        assert_eq!(keys(&store.list_all().unwrap()), vec!["xtest/sub:2"]);
        assert!(!store.remove(&ManifestKey::new("xtest", "1")).unwrap());
    }

    #[test]
    fn listing_survives_reopen() {
        let (dir, store) = store();
        add(&store, "p/app", "1");
        add(&store, "p/app", "2");
        drop(store);
        let reopened = FsManifestStore::open(dir.path().join("manifests")).unwrap();
        assert_eq!(
            keys(&reopened.list_all().unwrap()),
            vec!["p/app:1", "p/app:2"]
        );
    }

    #[test]
    fn invalidate_picks_up_foreign_changes() {
        let (dir, store) = store();
        add(&store, "app", "1");
        assert_eq!(store.list_all().unwrap().len(), 1);
        let other = FsManifestStore::open(dir.path().join("manifests")).unwrap();
        add(&other, "app", "2");
        assert_eq!(store.list_all().unwrap().len(), 1);
        store.invalidate();
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn remove_cleans_empty_directories() {
        let (_dir, store) = store();
        add(&store, "deep/nested/name", "1");
        store
            .remove(&ManifestKey::new("deep/nested/name", "1"))
            .unwrap();
        assert!(!store.root().join("deep").exists());
    }

    #[test]
    fn latest_uses_numeric_order() {
        let (_dir, store) = store();
        for tag in ["1", "2", "10", "9"] {
            add(&store, "app", tag);
        }
        add(&store, "app/child", "99");
        assert_eq!(
            store.latest("app").unwrap(),
            Some(ManifestKey::new("app", "10"))
        );
        assert_eq!(store.latest("missing").unwrap(), None);
    }

    #[test]
    fn stray_files_are_ignored() {
        let (_dir, store) = store();
        add(&store, "app", "1");
        fs::write(store.root().join("loose.json"), b"{}").unwrap();
        fs::write(store.root().join("app").join("notes.txt"), b"x").unwrap();
        assert_eq!(keys(&store.list_all().unwrap()), vec!["app:1"]);
    }

    #[test]
    fn mismatched_record_is_corrupt() {
        let (_dir, store) = store();
        add(&store, "app", "1");
        fs::copy(
            store.root().join("app").join("1.json"),
            store.root().join("app").join("2.json"),
        )
        .unwrap();
        let err = store.get(&ManifestKey::new("app", "2")).unwrap_err();
        assert!(matches!(err, ManifestError::Corrupt { .. }));
    }

    #[test]
    fn keys_outside_the_store_are_rejected() {
        let (dir, store) = store();
        let victim = dir.path().join("victim");
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("1.json"), b"{}").unwrap();

        let key: ManifestKey = "../victim:1".parse().unwrap();
        assert!(matches!(store.exists(&key), Err(ManifestError::InvalidName { .. })));
        assert!(matches!(store.get(&key), Err(ManifestError::InvalidName { .. })));
        assert!(matches!(store.remove(&key), Err(ManifestError::InvalidName { .. })));
        assert!(victim.join("1.json").exists());
    }

    #[test]
    fn concurrent_adds_all_reach_the_listing() {
        let (_dir, store) = store();
        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for n in 0..25 {
                        add(store, &format!("w{t}"), &n.to_string());
                        store.list_all().unwrap();
                    }
                });
            }
            for _ in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..25 {
                        store.invalidate();
                        store.list_all().unwrap();
                    }
                });
            }
        });
        assert_eq!(store.list_all().unwrap().len(), 100);
    }
}
