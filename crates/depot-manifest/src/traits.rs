//! The [`ManifestStore`] trait defining the manifest storage interface.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use depot_types::ManifestKey;

use crate::error::Result;
use crate::manifest::Manifest;

/// Storage backend for manifests.
///
/// Implementations must be thread-safe and must never overwrite an existing
/// key: adding a key twice fails with
/// [`ManifestError::AlreadyExists`](crate::ManifestError::AlreadyExists).
pub trait ManifestStore: Send + Sync {
    /// Add a manifest. Fails if the key exists.
    fn add(&self, manifest: &Manifest) -> Result<()>;

    /// Check whether a key exists.
    fn exists(&self, key: &ManifestKey) -> Result<bool>;

    /// Load a manifest.
    fn get(&self, key: &ManifestKey) -> Result<Manifest>;

    /// Remove a manifest. Returns `true` if it existed.
    fn remove(&self, key: &ManifestKey) -> Result<bool>;

    /// Every key in the store.
    fn list_all(&self) -> Result<BTreeSet<ManifestKey>>;

    /// Keys whose name equals `name` or lives below `name/`.
    fn list_for_name(&self, name: &str) -> Result<BTreeSet<ManifestKey>>;

    /// Forget any cached listing so the next listing sees changes made by
    /// other processes. Stores without a cache ignore this.
    fn refresh_listing(&self) {}

    /// Distinct manifest names.
    fn names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list_all()?
            .into_iter()
            .map(|k| k.name().to_string())
            .collect())
    }

    /// The newest tag stored under exactly `name`, by [`compare_tags`].
    fn latest(&self, name: &str) -> Result<Option<ManifestKey>> {
        Ok(self
            .list_for_name(name)?
            .into_iter()
            .filter(|k| k.name() == name)
            .max_by(|a, b| compare_tags(a.tag(), b.tag())))
    }
}

/// Order two tags: numerically if both are integers, lexically otherwise.
pub fn compare_tags(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
