use std::collections::{BTreeMap, BTreeSet};

use depot_manifest::{Manifest, ManifestBuilder};
use depot_store::Tree;
use depot_types::{ManifestKey, ObjectId};
use serde_json::{json, Value};
use tracing::info;

use crate::config::ScanOptions;
use crate::error::RepoResult;
use crate::objects::ScanNode;
use crate::operation::{Operation, OperationContext};

/// Record a manifest for a tree that is already stored.
#[derive(Clone, Debug)]
pub struct InsertManifest {
    pub key: ManifestKey,
    pub root: ObjectId,
    pub labels: BTreeMap<String, String>,
}

impl Operation for InsertManifest {
    type Output = Manifest;

    fn kind(&self) -> &'static str {
        "insert-manifest"
    }

    fn audit_params(&self) -> Value {
        json!({ "key": self.key.to_string(), "root": self.root, "labels": self.labels })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<Manifest> {
        // The root must decode as a tree; a dangling manifest is never added.
        Tree::load(ctx.objects(), &self.root)?;
        let mut builder = ManifestBuilder::new(self.key).root(self.root);
        for (name, value) in self.labels {
            builder = builder.label(name, value);
        }
        Ok(builder.insert(ctx.manifests())?)
    }
}

/// Keys in the store, optionally limited to a name and everything below it.
#[derive(Clone, Debug, Default)]
pub struct ListManifests {
    pub name: Option<String>,
}

impl Operation for ListManifests {
    type Output = BTreeSet<ManifestKey>;

    fn kind(&self) -> &'static str {
        "list"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<BTreeSet<ManifestKey>> {
        ctx.manifests().refresh_listing();
        Ok(match &self.name {
            Some(name) => ctx.manifests().list_for_name(name)?,
            None => ctx.manifests().list_all()?,
        })
    }
}

/// Load one manifest.
#[derive(Clone, Debug)]
pub struct ShowManifest {
    pub key: ManifestKey,
}

impl Operation for ShowManifest {
    type Output = Manifest;

    fn kind(&self) -> &'static str {
        "show"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<Manifest> {
        Ok(ctx.manifests().get(&self.key)?)
    }
}

/// Scan a manifest's tree.
#[derive(Clone, Debug)]
pub struct ScanManifest {
    pub key: ManifestKey,
    pub options: ScanOptions,
}

impl Operation for ScanManifest {
    type Output = ScanNode;

    fn kind(&self) -> &'static str {
        "scan"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<ScanNode> {
        let manifest = ctx.manifests().get(&self.key)?;
        ctx.object_manager().scan(manifest.root(), &self.options)
    }
}

/// Remove a manifest. Its objects stay until the next prune.
#[derive(Clone, Debug)]
pub struct DeleteManifest {
    pub key: ManifestKey,
}

impl Operation for DeleteManifest {
    type Output = bool;

    fn kind(&self) -> &'static str {
        "delete"
    }

    fn audit_params(&self) -> Value {
        json!({ "key": self.key.to_string() })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<bool> {
        let removed = ctx.manifests().remove(&self.key)?;
        if removed {
            info!(manifest = %self.key, "deleted manifest");
        }
        Ok(removed)
    }
}
