use std::path::PathBuf;

use depot_manifest::ManifestError;
use depot_store::StoreError;
use depot_txn::TxnError;
use thiserror::Error;

/// Errors surfaced by repositories and the operations run against them.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Any failure inside an operation, tagged with the repository it ran on.
    #[error("{kind} failed on repository {repository}: {source}")]
    OperationFailed {
        kind: &'static str,
        repository: String,
        #[source]
        source: Box<RepoError>,
    },

    /// The repository handle was used after `close`.
    #[error("repository {0} is closed")]
    Closed(String),

    /// The activity reporter asked the operation to stop.
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid repository address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("no repository at {0}")]
    NotARepository(PathBuf),

    #[error("repository already exists at {0}")]
    AlreadyExists(PathBuf),

    /// Export refused to write into a directory that already has content.
    #[error("export target {0} is not empty")]
    TargetNotEmpty(PathBuf),

    /// Import source is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Manifest references nested deeper than the resolver allows.
    #[error("manifest references nested deeper than {0} levels")]
    ReferenceDepth(usize),

    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// The innermost error, looking through [`RepoError::OperationFailed`].
    pub fn root_cause(&self) -> &RepoError {
        match self {
            Self::OperationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// `true` if the failure was caused by damaged content.
    pub fn is_corruption(&self) -> bool {
        matches!(self.root_cause(), Self::Store(e) if e.is_corruption())
    }
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
