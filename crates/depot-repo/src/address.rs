//! Repository addresses.
//!
//! A bare path or `file:` URI names a directory repository. A `jar:` URI or a
//! path ending in `.zip` names an archive-backed one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::RepoError;

/// Where a repository lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RepositoryAddress {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl RepositoryAddress {
    /// Address for a local path, choosing the backing by extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if is_zip(&path) {
            Self::Archive(path)
        } else {
            Self::Directory(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Strip `file:`, `file://` or `file:///` down to a path.
fn file_uri_path(rest: &str) -> &str {
    match rest.strip_prefix("//") {
        // `file:///abs` and `file://localhost/abs`
        Some(rest) => match rest.find('/') {
            Some(0) => rest,
            Some(i) if &rest[..i] == "localhost" => &rest[i..],
            _ => rest,
        },
        None => rest,
    }
}

impl FromStr for RepositoryAddress {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RepoError::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };
        if let Some(rest) = s.strip_prefix("jar:") {
            // `jar:file:/path/repo.zip!/` - anything after `!` addresses
            // entries inside the archive, which repositories do not use.
            let inner = rest.split('!').next().unwrap_or(rest);
            let inner = inner.strip_prefix("file:").ok_or_else(|| invalid("jar: must wrap a file: URI"))?;
            let path = file_uri_path(inner);
            if path.is_empty() {
                return Err(invalid("empty path"));
            }
            return Ok(Self::Archive(PathBuf::from(path)));
        }
        let path = match s.strip_prefix("file:") {
            Some(rest) => file_uri_path(rest),
            None if s.contains("://") => return Err(invalid("unsupported scheme")),
            None => s,
        };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        Ok(Self::from_path(path))
    }
}

impl fmt::Display for RepositoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "file:{}", path.display()),
            Self::Archive(path) => write!(f, "jar:file:{}!/", path.display()),
        }
    }
}
