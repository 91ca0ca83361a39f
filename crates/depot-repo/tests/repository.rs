mod common;

use std::fs;

use common::{init_repo, snapshot, write_files};
use depot_repo::ops::{
    DeleteManifest, ExportManifest, ImportTree, InsertManifest, ListManifests, ScanManifest,
    ShowManifest,
};
use depot_repo::{
    EntryType, ManifestKey, ObjectStore, RepoError, Repository, RepositoryAddress,
    RepositoryConfig, ScanNode, ScanOptions, Tree, TreeKey,
};
use depot_store::NoHook;
use proptest::prelude::*;

fn key(s: &str) -> ManifestKey {
    s.parse().unwrap()
}

#[test]
fn import_export_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let src = dir.path().join("src");
    write_files(
        &src,
        &[
            ("bin/app", b"\x7fELF binary"),
            ("conf/app.toml", b"port = 8080\n"),
            ("conf/empty", b""),
            ("README", b"hello"),
        ],
    );
    fs::create_dir_all(src.join("var/log")).unwrap();

    let manifest = repo
        .execute(ImportTree::new(&src, key("product/app:1")).label("origin", "test"))
        .unwrap();
    assert_eq!(manifest.label("origin"), Some("test"));

    let out = dir.path().join("out");
    repo.execute(ExportManifest::new(key("product/app:1"), &out)).unwrap();
    assert_eq!(snapshot(&src), snapshot(&out));
}

#[test]
fn importing_an_existing_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let src = dir.path().join("src");
    write_files(&src, &[("a", b"1")]);
    repo.execute(ImportTree::new(&src, key("app:1"))).unwrap();

    let err = repo.execute(ImportTree::new(&src, key("app:1"))).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RepoError::Manifest(depot_manifest::ManifestError::AlreadyExists(_))
    ));
}

#[test]
fn failures_are_wrapped_with_the_repository() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let err = repo
        .execute(ShowManifest { key: key("absent:1") })
        .unwrap_err();
    match &err {
        RepoError::OperationFailed { kind, repository, .. } => {
            assert_eq!(*kind, "show");
            assert!(repository.contains("repo"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn closed_handle_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    repo.close().unwrap();
    assert!(matches!(
        repo.execute(ListManifests::default()),
        Err(RepoError::Closed(_))
    ));
    assert!(matches!(repo.begin_transaction(), Err(RepoError::Closed(_))));
}

#[test]
fn mutating_operations_are_audited() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let src = dir.path().join("src");
    write_files(&src, &[("a", b"1")]);
    repo.execute(ImportTree::new(&src, key("app:1"))).unwrap();
    repo.execute(ListManifests::default()).unwrap();
    repo.execute(DeleteManifest { key: key("app:1") }).unwrap();

    let kinds: Vec<_> = repo
        .audit()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec!["import", "delete"]);
}

#[test]
fn name_prefix_listing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let src = dir.path().join("src");
    write_files(&src, &[("a", b"1")]);
    for k in ["a:1", "a/b:1", "a/b/c:1", "ab:1"] {
        repo.execute(ImportTree::new(&src, key(k))).unwrap();
    }

    let under_a = repo
        .execute(ListManifests { name: Some("a".into()) })
        .unwrap();
    assert_eq!(
        under_a.into_iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["a:1", "a/b:1", "a/b/c:1"]
    );
    let under_ab = repo
        .execute(ListManifests { name: Some("a/b".into()) })
        .unwrap();
    assert_eq!(under_ab.len(), 2);
    assert!(!under_ab.contains(&key("a:1")));
}

#[test]
fn nested_manifest_references_export_and_scan() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let lib = dir.path().join("lib");
    write_files(&lib, &[("libfoo.so", b"shared object")]);
    repo.execute(ImportTree::new(&lib, key("runtime/lib:7"))).unwrap();

    // A product tree embedding a reference to the runtime manifest.
    let objects = repo.objects();
    let app = objects.insert_bytes(b"app", &NoHook).unwrap();
    let reference = depot_store::ManifestReference::new(key("runtime/lib:7"))
        .store(objects, &NoHook)
        .unwrap();
    let mut builder = Tree::builder();
    builder.add(TreeKey::new("app", EntryType::Blob), app).unwrap();
    builder.add(TreeKey::new("runtime", EntryType::Manifest), reference).unwrap();
    let root = builder.build().store(objects, &NoHook).unwrap();
    repo.execute(InsertManifest {
        key: key("product:1"),
        root,
        labels: Default::default(),
    })
    .unwrap();

    let deep = dir.path().join("deep");
    repo.execute(ExportManifest::new(key("product:1"), &deep)).unwrap();
    assert_eq!(fs::read(deep.join("runtime/libfoo.so")).unwrap(), b"shared object");

    let shallow = dir.path().join("shallow");
    repo.execute(ExportManifest::new(key("product:1"), &shallow).shallow())
        .unwrap();
    assert!(shallow.join("app").is_file());
    assert!(!shallow.join("runtime").exists());

    let node = repo
        .execute(ScanManifest {
            key: key("product:1"),
            options: ScanOptions::default(),
        })
        .unwrap();
    let ScanNode::Tree { entries, .. } = node else {
        panic!("expected a tree");
    };
    assert!(matches!(
        &entries[1].1,
        ScanNode::Reference { target: Some(_), .. }
    ));
}

#[test]
fn insert_manifest_requires_a_stored_tree() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("repo"));
    let blob = repo.objects().insert_bytes(b"not a tree", &NoHook).unwrap();
    let err = repo
        .execute(InsertManifest {
            key: key("bad:1"),
            root: blob,
            labels: Default::default(),
        })
        .unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn archive_repository_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    let address: RepositoryAddress = format!("jar:file:{}!/", archive.display()).parse().unwrap();
    let src = dir.path().join("src");
    write_files(&src, &[("x/y", b"zipped")]);

    let repo = Repository::init(&address, RepositoryConfig::default()).unwrap();
    repo.execute(ImportTree::new(&src, key("pkg:1"))).unwrap();
    assert!(!repo.audit().is_enabled());
    repo.close().unwrap();
    drop(repo);
    assert!(archive.is_file());

    let reopened = Repository::open(&RepositoryAddress::from_path(&archive)).unwrap();
    let out = dir.path().join("out");
    reopened
        .execute(ExportManifest::new(key("pkg:1"), &out))
        .unwrap();
    assert_eq!(fs::read(out.join("x/y")).unwrap(), b"zipped");
}

#[test]
fn opening_a_plain_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Repository::open(&RepositoryAddress::Directory(dir.path().to_path_buf())),
        Err(RepoError::NotARepository(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn roundtrip_arbitrary_trees(
        files in prop::collection::btree_map("[a-z]{1,6}(/[a-z]{1,6}){0,2}", prop::collection::vec(any::<u8>(), 0..256), 1..8)
    ) {
        // Drop paths that collide with another path's directory.
        let files: Vec<(String, Vec<u8>)> = files
            .iter()
            .filter(|(p, _)| !files.keys().any(|o| o.starts_with(&format!("{p}/"))))
            .map(|(p, d)| (p.clone(), d.clone()))
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(&dir.path().join("repo"));
        let src = dir.path().join("src");
        let refs: Vec<(&str, &[u8])> = files.iter().map(|(p, d)| (p.as_str(), d.as_slice())).collect();
        write_files(&src, &refs);

        repo.execute(ImportTree::new(&src, key("prop:1"))).unwrap();
        let out = dir.path().join("out");
        repo.execute(ExportManifest::new(key("prop:1"), &out)).unwrap();
        prop_assert_eq!(snapshot(&src), snapshot(&out));
    }
}

#[test]
fn deleting_a_key_outside_the_store_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("repo");
    let repo = init_repo(&root);
    write_files(&root, &[("victim/1.json", b"{}")]);

    let err = repo
        .execute(DeleteManifest { key: key("../victim:1") })
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RepoError::Manifest(depot_manifest::ManifestError::InvalidName { .. })
    ));
    assert!(repo.execute(ShowManifest { key: key("../victim:1") }).is_err());
    assert!(root.join("victim/1.json").exists());
}
