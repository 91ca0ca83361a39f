//! Tree-level orchestration over the object and manifest stores.
//!
//! [`ObjectManager`] imports directories into trees, exports trees back to
//! directories, produces depth-bounded scans, and walks the reachable object
//! graph for collection and consistency checks.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use depot_manifest::{ManifestError, ManifestStore};
use depot_store::{
    EntryType, InsertHook, ManifestReference, ObjectStore, StoreError, Tree, TreeKey,
};
use depot_types::{ManifestKey, ObjectId};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, warn};

use crate::activity::{Activity, ActivityReporter};
use crate::config::ScanOptions;
use crate::error::{RepoError, RepoResult};

/// How many manifest references an export follows before giving up.
pub const MAX_REFERENCE_DEPTH: usize = 32;

/// Decides what happens to a `MANIFEST` entry during export.
pub trait ReferenceHandler: Sync {
    /// Materialize `reference` at `target`. `depth` counts reference hops
    /// from the exported root.
    fn resolve(
        &self,
        manager: &ObjectManager<'_>,
        reference: &ManifestKey,
        target: &Path,
        depth: usize,
    ) -> RepoResult<()>;
}

/// Exports the referenced manifest's tree in place of the reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolveReferences;

impl ReferenceHandler for ResolveReferences {
    fn resolve(
        &self,
        manager: &ObjectManager<'_>,
        reference: &ManifestKey,
        target: &Path,
        depth: usize,
    ) -> RepoResult<()> {
        let manifest = manager.manifests.get(reference)?;
        debug!(reference = %reference, target = %target.display(), "resolving manifest reference");
        manager.export_subtree(manifest.root(), target, self, depth)
    }
}

/// Leaves references out of the export.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipReferences;

impl ReferenceHandler for SkipReferences {
    fn resolve(&self, _: &ObjectManager<'_>, _: &ManifestKey, _: &Path, _: usize) -> RepoResult<()> {
        Ok(())
    }
}

/// One node of a scanned tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanNode {
    Blob {
        id: ObjectId,
        size: u64,
    },
    Tree {
        id: ObjectId,
        entries: Vec<(TreeKey, ScanNode)>,
    },
    /// A reference hop. `target` is `None` when the referenced manifest is
    /// not in the store.
    Reference {
        id: ObjectId,
        manifest: ManifestKey,
        target: Option<Box<ScanNode>>,
    },
    /// Beyond the requested depth; expand with [`ObjectManager::expand`].
    Unexpanded {
        id: ObjectId,
        entry_type: EntryType,
    },
    /// The backing object does not exist.
    Missing {
        id: ObjectId,
        entry_type: EntryType,
    },
}

impl ScanNode {
    pub fn id(&self) -> &ObjectId {
        match self {
            Self::Blob { id, .. }
            | Self::Tree { id, .. }
            | Self::Reference { id, .. }
            | Self::Unexpanded { id, .. }
            | Self::Missing { id, .. } => id,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }

    /// Ids of every missing node in this subtree.
    pub fn missing(&self) -> BTreeSet<ObjectId> {
        let mut out = BTreeSet::new();
        self.collect_missing(&mut out);
        out
    }

    fn collect_missing(&self, out: &mut BTreeSet<ObjectId>) {
        match self {
            Self::Missing { id, .. } => {
                out.insert(*id);
            }
            Self::Tree { entries, .. } => {
                for (_, node) in entries {
                    node.collect_missing(out);
                }
            }
            Self::Reference {
                target: Some(target),
                ..
            } => target.collect_missing(out),
            _ => {}
        }
    }
}

/// Objects reachable from a set of roots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reachability {
    /// Reachable objects that exist.
    pub present: BTreeSet<ObjectId>,
    /// Reachable objects that do not exist.
    pub missing: BTreeSet<ObjectId>,
    /// Trees or references that exist but could not be decoded. Their
    /// children are unknown.
    pub unreadable: BTreeSet<ObjectId>,
    /// Manifests that were walked.
    pub manifests: usize,
}

impl Reachability {
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.present.contains(id) || self.missing.contains(id) || self.unreadable.contains(id)
    }

    /// Every reachable id, present or not.
    pub fn all(&self) -> BTreeSet<ObjectId> {
        self.present
            .iter()
            .chain(&self.missing)
            .chain(&self.unreadable)
            .copied()
            .collect()
    }
}

/// Mid-level operations on trees, bound to one operation's stores and
/// worker pool.
#[derive(Clone, Copy)]
pub struct ObjectManager<'a> {
    pub(crate) objects: &'a dyn ObjectStore,
    pub(crate) manifests: &'a dyn ManifestStore,
    workers: &'a ThreadPool,
    reporter: &'a dyn ActivityReporter,
}

impl<'a> ObjectManager<'a> {
    pub fn new(
        objects: &'a dyn ObjectStore,
        manifests: &'a dyn ManifestStore,
        workers: &'a ThreadPool,
        reporter: &'a dyn ActivityReporter,
    ) -> Self {
        Self {
            objects,
            manifests,
            workers,
            reporter,
        }
    }

    pub fn objects(&self) -> &'a dyn ObjectStore {
        self.objects
    }

    pub fn manifests(&self) -> &'a dyn ManifestStore {
        self.manifests
    }

    // ---- Primitives ----

    pub fn insert_tree(&self, tree: &Tree, hook: &dyn InsertHook) -> RepoResult<ObjectId> {
        Ok(tree.store(self.objects, hook)?)
    }

    /// Store the indirection object a `MANIFEST` tree entry points at.
    pub fn insert_manifest_reference(
        &self,
        key: &ManifestKey,
        hook: &dyn InsertHook,
    ) -> RepoResult<ObjectId> {
        Ok(ManifestReference::new(key.clone()).store(self.objects, hook)?)
    }

    // ---- Import ----

    /// Import the directory at `source` as a tree and return its id.
    ///
    /// Files in each directory are hashed and inserted on the worker pool.
    /// Symbolic links are followed; other special files are skipped.
    pub fn import_tree(&self, source: &Path, hook: &dyn InsertHook) -> RepoResult<ObjectId> {
        if !source.is_dir() {
            return Err(RepoError::NotADirectory(source.to_path_buf()));
        }
        let mut activity = Activity::start(self.reporter, format!("import {}", source.display()), None);
        let root = self.import_dir(source, hook, &mut activity)?;
        debug!(source = %source.display(), root = %root, files = activity.done(), "imported tree");
        Ok(root)
    }

    fn import_dir(
        &self,
        dir: &Path,
        hook: &dyn InsertHook,
        activity: &mut Activity<'_>,
    ) -> RepoResult<ObjectId> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().into_string().map_err(|name| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file name {name:?} in {} is not UTF-8", dir.display()),
                )
            })?;
            let file_type = fs::metadata(&path)?.file_type();
            if file_type.is_dir() {
                dirs.push((name, path));
            } else if file_type.is_file() {
                files.push((name, path));
            } else {
                warn!(path = %path.display(), "skipping special file");
            }
        }

        let reporter = self.reporter;
        let objects = self.objects;
        let blobs = self.workers.install(|| {
            files
                .par_iter()
                .map(|(name, path)| {
                    reporter.check_cancelled()?;
                    let id = objects.insert_file(path, hook)?;
                    Ok((name.clone(), id))
                })
                .collect::<RepoResult<Vec<_>>>()
        })?;
        activity.advance(blobs.len() as u64)?;

        let mut builder = Tree::builder();
        for (name, id) in blobs {
            builder.add(TreeKey::new(name, EntryType::Blob), id)?;
        }
        for (name, path) in dirs {
            let id = self.import_dir(&path, hook, activity)?;
            builder.add(TreeKey::new(name, EntryType::Tree), id)?;
        }
        self.insert_tree(&builder.build(), hook)
    }

    // ---- Export ----

    /// Recreate the tree `root` at `target`, which must be absent or an empty
    /// directory. `MANIFEST` entries are passed to `handler`.
    pub fn export_tree(
        &self,
        root: &ObjectId,
        target: &Path,
        handler: &dyn ReferenceHandler,
    ) -> RepoResult<()> {
        if target.exists() && !is_empty_dir(target)? {
            return Err(RepoError::TargetNotEmpty(target.to_path_buf()));
        }
        let _activity = Activity::start(self.reporter, format!("export {}", target.display()), None);
        self.export_subtree(root, target, handler, 0)
    }

    /// Export `root` into `dir`, creating it if needed. Used by reference
    /// handlers to materialize nested manifests.
    pub fn export_subtree(
        &self,
        root: &ObjectId,
        dir: &Path,
        handler: &dyn ReferenceHandler,
        depth: usize,
    ) -> RepoResult<()> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(RepoError::ReferenceDepth(MAX_REFERENCE_DEPTH));
        }
        self.reporter.check_cancelled()?;
        fs::create_dir_all(dir)?;
        let tree = Tree::load(self.objects, root)?;

        let mut blobs = Vec::new();
        for (key, id) in tree.iter() {
            let path = dir.join(entry_file_name(root, &key.name)?);
            match key.entry_type {
                EntryType::Blob => blobs.push((path, *id)),
                EntryType::Tree => self.export_subtree(id, &path, handler, depth)?,
                EntryType::Manifest => {
                    let reference = ManifestReference::load(self.objects, id)?;
                    handler.resolve(self, &reference.manifest, &path, depth + 1)?;
                }
            }
        }

        let objects = self.objects;
        self.workers.install(|| {
            blobs.par_iter().try_for_each(|(path, id)| -> RepoResult<()> {
                let mut reader = objects.open(id)?;
                let mut file = File::create(path)?;
                io::copy(&mut reader, &mut file)?;
                Ok(())
            })
        })
    }

    // ---- Scan ----

    /// Materialize the tree `root` down to `options.max_depth`.
    ///
    /// Absent objects become [`ScanNode::Missing`] unless the options are
    /// strict, in which case the scan fails.
    pub fn scan(&self, root: &ObjectId, options: &ScanOptions) -> RepoResult<ScanNode> {
        self.scan_node(root, EntryType::Tree, 0, options)
    }

    /// Scan below an unexpanded node, treating it as a new root. Other
    /// nodes are returned unchanged.
    pub fn expand(&self, node: &ScanNode, options: &ScanOptions) -> RepoResult<ScanNode> {
        match node {
            ScanNode::Unexpanded { id, entry_type } => self.scan_node(id, *entry_type, 0, options),
            other => Ok(other.clone()),
        }
    }

    fn scan_node(
        &self,
        id: &ObjectId,
        entry_type: EntryType,
        depth: usize,
        options: &ScanOptions,
    ) -> RepoResult<ScanNode> {
        if depth > options.max_depth {
            return Ok(ScanNode::Unexpanded { id: *id, entry_type });
        }
        self.reporter.check_cancelled()?;
        let missing = || -> RepoResult<ScanNode> {
            if options.tolerate_missing {
                Ok(ScanNode::Missing { id: *id, entry_type })
            } else {
                Err(StoreError::NotFound(*id).into())
            }
        };
        match entry_type {
            EntryType::Blob => match self.objects.locate(id)? {
                Some(path) => Ok(ScanNode::Blob {
                    id: *id,
                    size: fs::metadata(path)?.len(),
                }),
                None => missing(),
            },
            EntryType::Tree => {
                let tree = match Tree::load(self.objects, id) {
                    Ok(tree) => tree,
                    Err(StoreError::NotFound(_)) => return missing(),
                    Err(e) => return Err(e.into()),
                };
                let entries = tree
                    .iter()
                    .map(|(key, child)| {
                        let node = self.scan_node(child, key.entry_type, depth + 1, options)?;
                        Ok((key.clone(), node))
                    })
                    .collect::<RepoResult<Vec<_>>>()?;
                Ok(ScanNode::Tree { id: *id, entries })
            }
            EntryType::Manifest => {
                let reference = match ManifestReference::load(self.objects, id) {
                    Ok(reference) => reference,
                    Err(StoreError::NotFound(_)) => return missing(),
                    Err(e) => return Err(e.into()),
                };
                let target = match self.manifests.get(&reference.manifest) {
                    Ok(manifest) => Some(Box::new(self.scan_node(
                        manifest.root(),
                        EntryType::Tree,
                        depth + 1,
                        options,
                    )?)),
                    Err(ManifestError::NotFound(_)) if options.tolerate_missing => None,
                    Err(e) => return Err(e.into()),
                };
                Ok(ScanNode::Reference {
                    id: *id,
                    manifest: reference.manifest,
                    target,
                })
            }
        }
    }

    // ---- Reachability ----

    /// Walk every object reachable from `root` into `reach`.
    ///
    /// Reference objects are included but not followed: the manifest they
    /// name is walked on its own when it lives in the same store.
    pub fn walk(&self, root: &ObjectId, reach: &mut Reachability) -> RepoResult<()> {
        let mut stack = vec![(*root, EntryType::Tree)];
        while let Some((id, entry_type)) = stack.pop() {
            if reach.contains(&id) {
                continue;
            }
            match entry_type {
                EntryType::Blob | EntryType::Manifest => {
                    if self.objects.exists(&id)? {
                        reach.present.insert(id);
                    } else {
                        reach.missing.insert(id);
                    }
                }
                EntryType::Tree => match Tree::load(self.objects, &id) {
                    Ok(tree) => {
                        reach.present.insert(id);
                        stack.extend(tree.iter().map(|(k, child)| (*child, k.entry_type)));
                    }
                    Err(StoreError::NotFound(_)) => {
                        reach.missing.insert(id);
                    }
                    Err(e) if e.is_corruption() => {
                        warn!(object = %id, error = %e, "unreadable tree");
                        reach.unreadable.insert(id);
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }

    /// Walk every manifest currently in the store. Manifests that disappear
    /// between listing and loading are skipped.
    pub fn reachable_from_manifests(&self) -> RepoResult<Reachability> {
        self.manifests.refresh_listing();
        let keys = self.manifests.list_all()?;
        let mut reach = Reachability::default();
        let mut activity = Activity::start(self.reporter, "walk manifests", Some(keys.len() as u64));
        for key in keys {
            match self.manifests.get(&key) {
                Ok(manifest) => {
                    self.walk(manifest.root(), &mut reach)?;
                    reach.manifests += 1;
                }
                Err(ManifestError::NotFound(_)) => {
                    warn!(manifest = %key, "manifest vanished while listing, skipping");
                }
                Err(e) => return Err(e.into()),
            }
            activity.advance(1)?;
        }
        Ok(reach)
    }
}

fn is_empty_dir(path: &Path) -> RepoResult<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Tree entry names must be single path components.
fn entry_file_name(tree: &ObjectId, name: &str) -> RepoResult<PathBuf> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(StoreError::InvalidObject {
            id: *tree,
            reason: format!("entry name {name:?} is not a plain file name"),
        }
        .into());
    }
    Ok(PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::TracingReporter;
    use depot_manifest::{FsManifestStore, ManifestBuilder};
    use depot_store::{FsObjectStore, NoHook};

    struct Fixture {
        _dir: tempfile::TempDir,
        objects: FsObjectStore,
        manifests: FsManifestStore,
        workers: ThreadPool,
        reporter: TracingReporter,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                objects: FsObjectStore::open(dir.path().join("objects")).unwrap(),
                manifests: FsManifestStore::open(dir.path().join("manifests")).unwrap(),
                workers: rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap(),
                reporter: TracingReporter::default(),
                _dir: dir,
            }
        }

        fn manager(&self) -> ObjectManager<'_> {
            ObjectManager::new(&self.objects, &self.manifests, &self.workers, &self.reporter)
        }
    }

    fn blob_tree(f: &Fixture, files: &[(&str, &[u8])]) -> ObjectId {
        let mut builder = Tree::builder();
        for (name, data) in files {
            let id = f.objects.insert_bytes(data, &NoHook).unwrap();
            builder.add(TreeKey::new(*name, EntryType::Blob), id).unwrap();
        }
        f.manager().insert_tree(&builder.build(), &NoHook).unwrap()
    }

    #[test]
    fn scan_respects_depth() {
        let f = Fixture::new();
        let inner = blob_tree(&f, &[("a", b"a")]);
        let mut builder = Tree::builder();
        builder.add(TreeKey::new("sub", EntryType::Tree), inner).unwrap();
        let root = f.manager().insert_tree(&builder.build(), &NoHook).unwrap();

        let shallow = f.manager().scan(&root, &ScanOptions::depth(0)).unwrap();
        let ScanNode::Tree { entries, .. } = &shallow else {
            panic!("expected tree, got {shallow:?}");
        };
        assert!(matches!(entries[0].1, ScanNode::Unexpanded { entry_type: EntryType::Tree, .. }));

        let expanded = f.manager().expand(&entries[0].1, &ScanOptions::default()).unwrap();
        let ScanNode::Tree { entries, .. } = expanded else {
            panic!("expected tree");
        };
        assert_eq!(entries[0].1, ScanNode::Blob { id: f.objects.insert_bytes(b"a", &NoHook).unwrap(), size: 1 });
    }

    #[test]
    fn scan_reports_missing_blob() {
        let f = Fixture::new();
        let root = blob_tree(&f, &[("gone", b"gone"), ("kept", b"kept")]);
        let gone = depot_crypto::ContentHasher::hash(b"gone");
        f.objects.remove(&gone).unwrap();

        let node = f.manager().scan(&root, &ScanOptions::default()).unwrap();
        assert_eq!(node.missing(), BTreeSet::from([gone]));

        let strict = f.manager().scan(&root, &ScanOptions::default().strict());
        assert!(matches!(strict, Err(RepoError::Store(StoreError::NotFound(id))) if id == gone));
    }

    #[test]
    fn scan_follows_references() {
        let f = Fixture::new();
        let lib_root = blob_tree(&f, &[("lib.so", b"elf")]);
        ManifestBuilder::new(ManifestKey::new("lib", "1"))
            .root(lib_root)
            .insert(&f.manifests)
            .unwrap();
        let reference = f
            .manager()
            .insert_manifest_reference(&ManifestKey::new("lib", "1"), &NoHook)
            .unwrap();
        let dangling = f
            .manager()
            .insert_manifest_reference(&ManifestKey::new("lib", "2"), &NoHook)
            .unwrap();
        let mut builder = Tree::builder();
        builder.add(TreeKey::new("lib", EntryType::Manifest), reference).unwrap();
        builder.add(TreeKey::new("next", EntryType::Manifest), dangling).unwrap();
        let root = f.manager().insert_tree(&builder.build(), &NoHook).unwrap();

        let ScanNode::Tree { entries, .. } = f.manager().scan(&root, &ScanOptions::default()).unwrap() else {
            panic!("expected tree");
        };
        match &entries[0].1 {
            ScanNode::Reference { manifest, target: Some(target), .. } => {
                assert_eq!(manifest, &ManifestKey::new("lib", "1"));
                assert_eq!(target.id(), &lib_root);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&entries[1].1, ScanNode::Reference { target: None, .. }));
    }

    #[test]
    fn walk_collects_present_and_missing() {
        let f = Fixture::new();
        let root = blob_tree(&f, &[("x", b"x"), ("y", b"y")]);
        let y = depot_crypto::ContentHasher::hash(b"y");
        f.objects.remove(&y).unwrap();

        let mut reach = Reachability::default();
        f.manager().walk(&root, &mut reach).unwrap();
        assert!(reach.present.contains(&root));
        assert!(reach.present.contains(&depot_crypto::ContentHasher::hash(b"x")));
        assert_eq!(reach.missing, BTreeSet::from([y]));
        assert_eq!(reach.all().len(), 3);
    }

    #[test]
    fn export_rejects_unsafe_entry_names() {
        let f = Fixture::new();
        let root = blob_tree(&f, &[("../escape", b"x")]);
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("t");
        let err = f.manager().export_tree(&root, &target, &SkipReferences).unwrap_err();
        assert!(err.is_corruption());
        assert!(!out.path().join("escape").exists());
    }

    #[test]
    fn export_refuses_non_empty_target() {
        let f = Fixture::new();
        let root = blob_tree(&f, &[("a", b"a")]);
        let out = tempfile::tempdir().unwrap();
        fs::write(out.path().join("existing"), b"").unwrap();
        assert!(matches!(
            f.manager().export_tree(&root, out.path(), &SkipReferences),
            Err(RepoError::TargetNotEmpty(_))
        ));
    }
}
