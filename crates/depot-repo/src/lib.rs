//! Repositories for the depot store.
//!
//! A [`Repository`] binds an object store, a manifest store and a
//! transaction manager under one root (a directory or a zip archive) and runs
//! [`Operation`]s against them:
//!
//! ```text
//! <root>/
//!   depot.toml   configuration
//!   objects/     content store
//!   manifests/   one record per name and tag
//!   markers/     per-transaction marker stores
//!   log/         audit trail (directory repositories only)
//! ```
//!
//! Each call to [`Repository::execute`] opens a scoped [`OperationContext`]
//! with its own worker pool, audits mutating operations, and reports any
//! failure as [`RepoError::OperationFailed`].

pub mod activity;
pub mod address;
mod archive;
pub mod audit;
pub mod config;
pub mod error;
pub mod objects;
pub mod operation;
pub mod ops;
pub mod repository;

pub use activity::{Activity, ActivityReporter, CancelToken, TracingReporter};
pub use address::RepositoryAddress;
pub use audit::{AuditLog, AuditRecord};
pub use config::{RepositoryConfig, ScanOptions};
pub use error::{RepoError, RepoResult};
pub use objects::{
    ObjectManager, Reachability, ReferenceHandler, ResolveReferences, ScanNode, SkipReferences,
};
pub use operation::{Operation, OperationContext};
pub use repository::Repository;

// Re-export the types every caller needs.
pub use depot_manifest::{Manifest, ManifestStore};
pub use depot_store::{EntryType, ObjectStore, Tree, TreeKey};
pub use depot_types::{ManifestKey, ObjectId};
