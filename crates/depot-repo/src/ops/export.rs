use std::path::PathBuf;

use depot_types::ManifestKey;
use serde_json::{json, Value};

use crate::error::RepoResult;
use crate::objects::{ReferenceHandler, ResolveReferences, SkipReferences};
use crate::operation::{Operation, OperationContext};

/// Write a manifest's tree out to a directory.
#[derive(Clone, Debug)]
pub struct ExportManifest {
    pub key: ManifestKey,
    pub target: PathBuf,
    /// Materialize referenced manifests in place; otherwise they are left
    /// out.
    pub resolve_references: bool,
}

impl ExportManifest {
    pub fn new(key: ManifestKey, target: impl Into<PathBuf>) -> Self {
        Self {
            key,
            target: target.into(),
            resolve_references: true,
        }
    }

    pub fn shallow(mut self) -> Self {
        self.resolve_references = false;
        self
    }
}

impl Operation for ExportManifest {
    type Output = ();

    fn kind(&self) -> &'static str {
        "export"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn audit_params(&self) -> Value {
        json!({ "key": self.key.to_string(), "target": self.target.display().to_string() })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<()> {
        let manifest = ctx.manifests().get(&self.key)?;
        let handler: &dyn ReferenceHandler = if self.resolve_references {
            &ResolveReferences
        } else {
            &SkipReferences
        };
        ctx.object_manager()
            .export_tree(manifest.root(), &self.target, handler)
    }
}
