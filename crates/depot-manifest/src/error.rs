//! Error types for manifest operations.

use std::path::PathBuf;

use depot_types::ManifestKey;
use thiserror::Error;

/// Errors that can occur during manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest was not found.
    #[error("manifest not found: {0}")]
    NotFound(ManifestKey),

    /// A manifest with this key already exists. Manifests are immutable.
    #[error("manifest already exists: {0}")]
    AlreadyExists(ManifestKey),

    /// The manifest name is invalid.
    #[error("invalid manifest name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The manifest tag is invalid.
    #[error("invalid manifest tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    /// A builder was finished without a root tree.
    #[error("manifest {0} has no root tree")]
    MissingRoot(ManifestKey),

    /// A record on disk does not match its location or cannot be decoded.
    #[error("corrupt manifest record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the backing directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for manifest operations.
pub type Result<T> = std::result::Result<T, ManifestError>;
