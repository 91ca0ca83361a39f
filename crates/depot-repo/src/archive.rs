//! Zip-archive backing for repositories.
//!
//! An archive repository is unpacked into a private working directory when
//! opened. Closing it re-packs the working directory into a temporary file
//! next to the archive and renames it over the original, so readers never
//! see a half-written archive.

use std::fs::File;
use std::io;
use std::path::{Component, Path};

use tempfile::{NamedTempFile, TempDir};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::RepoResult;

/// Names never written into an archive.
const TRANSIENT: &[&str] = &[".tmp", ".lock", ".refdb"];

/// Unpack `archive` into a fresh working directory. A missing archive yields
/// an empty one.
pub fn unpack(archive: &Path) -> RepoResult<TempDir> {
    let workdir = tempfile::Builder::new().prefix("depot-archive-").tempdir()?;
    match File::open(archive) {
        Ok(file) => {
            let mut zip = ZipArchive::new(file)?;
            debug!(archive = %archive.display(), entries = zip.len(), "unpacking archive");
            zip.extract(workdir.path())?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(workdir)
}

/// Pack `workdir` into `archive`, replacing it atomically.
pub fn pack(workdir: &Path, archive: &Path) -> RepoResult<()> {
    let parent = match archive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tmp.as_file_mut());
    let mut entries = 0usize;

    let walker = WalkDir::new(workdir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !TRANSIENT.iter().any(|t| e.file_name() == *t));
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let Some(name) = entry_name(workdir, entry.path()) else {
            continue;
        };
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
            entries += 1;
        }
    }
    zip.finish()?;
    tmp.persist(archive).map_err(|e| e.error)?;
    debug!(archive = %archive.display(), files = entries, "packed archive");
    Ok(())
}

/// Archive entry name for `path`: relative, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
