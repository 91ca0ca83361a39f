//! Content-addressed object storage for the depot store.
//!
//! Every blob, tree and manifest reference is stored as an immutable object
//! identified by the BLAKE3 digest of its bytes, analogous to git's
//! `.git/objects/` directory.
//!
//! # Object Types
//!
//! The store itself never interprets bytes. Interpretation comes from the
//! referring [`Tree`] entry:
//!
//! - [`EntryType::Blob`] -- raw file content
//! - [`EntryType::Tree`] -- a serialized [`Tree`]
//! - [`EntryType::Manifest`] -- a serialized [`ManifestReference`]
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`FsObjectStore`] -- one file per object under `<root>/<shard>/<id>`
//! - [`PooledObjectStore`] -- a local store that reads through to a shared pool
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Objects are written to a temporary file first and renamed into place, so
//!    a partial object is never visible under its final name.
//! 3. Inserting an object that already exists is a silent no-op.
//! 4. A digest mismatch on verification is corruption and is never repaired
//!    silently.

pub mod error;
pub mod fs;
pub mod pooled;
pub mod traits;
pub mod tree;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use pooled::PooledObjectStore;
pub use traits::{InsertHook, NoHook, ObjectStore, RemovalReport};
pub use tree::{EntryType, ManifestReference, Tree, TreeBuilder, TreeKey};
