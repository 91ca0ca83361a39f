#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use depot_repo::{Repository, RepositoryAddress, RepositoryConfig};

/// Write `files` (relative path, content) below `root`.
pub fn write_files(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, data) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
}

/// Snapshot of a directory: relative path → content (`None` for dirs).
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, content)
        })
        .collect()
}

pub fn init_repo(dir: &Path) -> Repository {
    let config = RepositoryConfig {
        worker_threads: 2,
        ..Default::default()
    };
    Repository::init(&RepositoryAddress::Directory(dir.to_path_buf()), config).unwrap()
}
