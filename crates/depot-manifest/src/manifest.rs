//! The manifest value type and its builder.

use std::collections::BTreeMap;

use depot_types::{ManifestKey, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, Result};
use crate::names::validate_key;
use crate::traits::ManifestStore;

/// A named, tagged, immutable pointer to a root tree plus free-form labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    key: ManifestKey,
    root: ObjectId,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl Manifest {
    /// The key identifying this manifest.
    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    /// Id of the root tree object.
    pub fn root(&self) -> &ObjectId {
        &self.root
    }

    /// All labels in key order.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// A single label value.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Accumulates a root id and labels, then is inserted as one record.
#[derive(Clone, Debug)]
pub struct ManifestBuilder {
    key: ManifestKey,
    root: Option<ObjectId>,
    labels: BTreeMap<String, String>,
}

impl ManifestBuilder {
    pub fn new(key: ManifestKey) -> Self {
        Self {
            key,
            root: None,
            labels: BTreeMap::new(),
        }
    }

    /// Set the root tree.
    pub fn root(mut self, root: ObjectId) -> Self {
        self.root = Some(root);
        self
    }

    /// Add or replace a label.
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Validate and freeze into a [`Manifest`].
    pub fn build(self) -> Result<Manifest> {
        validate_key(&self.key)?;
        let root = self.root.ok_or_else(|| ManifestError::MissingRoot(self.key.clone()))?;
        Ok(Manifest {
            key: self.key,
            root,
            labels: self.labels,
        })
    }

    /// Build and add to `store` in one step.
    pub fn insert(self, store: &dyn ManifestStore) -> Result<Manifest> {
        let manifest = self.build()?;
        store.add(&manifest)?;
        Ok(manifest)
    }
}
