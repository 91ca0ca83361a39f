use std::path::PathBuf;

use depot_repo::RepoError;
use depot_store::StoreError;
use depot_txn::TxnError;
use depot_types::ObjectId;
use thiserror::Error;

/// Errors from pool reorganization.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A copy into the pool did not hash to the expected id. The run is
    /// aborted.
    #[error("copy of {id} from {repository} hashed to {computed}")]
    CopyMismatch {
        id: ObjectId,
        computed: ObjectId,
        repository: String,
    },

    /// A repository passed to the organizer does not read through to the
    /// pool being reorganized.
    #[error("repository {0} does not use this pool")]
    NotPooled(String),

    #[error("invalid pool configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("reference index: {0}")]
    Index(#[from] redb::Error),

    #[error("reference index entry is malformed: {0}")]
    CorruptIndex(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The pool lock could not be taken.
    #[error(transparent)]
    Lock(#[from] TxnError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! index_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PoolError {
                fn from(e: $ty) -> Self {
                    Self::Index(e.into())
                }
            }
        )*
    };
}

index_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
