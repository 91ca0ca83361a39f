use std::collections::BTreeMap;
use std::path::PathBuf;

use depot_manifest::{Manifest, ManifestBuilder, ManifestError};
use depot_types::ManifestKey;
use serde_json::{json, Value};
use tracing::info;

use crate::error::RepoResult;
use crate::operation::{Operation, OperationContext};

/// Import a directory and record it as a new manifest version.
///
/// Every object written is recorded in a transaction that stays open until
/// the manifest exists, so a concurrent prune never sees the content as
/// unreferenced.
#[derive(Clone, Debug)]
pub struct ImportTree {
    pub source: PathBuf,
    pub key: ManifestKey,
    pub labels: BTreeMap<String, String>,
}

impl ImportTree {
    pub fn new(source: impl Into<PathBuf>, key: ManifestKey) -> Self {
        Self {
            source: source.into(),
            key,
            labels: BTreeMap::new(),
        }
    }

    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}

impl Operation for ImportTree {
    type Output = Manifest;

    fn kind(&self) -> &'static str {
        "import"
    }

    fn audit_params(&self) -> Value {
        json!({
            "source": self.source.display().to_string(),
            "key": self.key.to_string(),
            "labels": self.labels,
        })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<Manifest> {
        if ctx.manifests().exists(&self.key)? {
            return Err(ManifestError::AlreadyExists(self.key).into());
        }
        let txn = ctx.begin_transaction()?;
        let root = ctx.object_manager().import_tree(&self.source, &txn)?;
        let mut builder = ManifestBuilder::new(self.key).root(root);
        for (name, value) in self.labels {
            builder = builder.label(name, value);
        }
        let manifest = builder.insert(ctx.manifests())?;
        txn.commit()?;
        info!(manifest = %manifest.key(), root = %root, "imported manifest");
        Ok(manifest)
    }
}
