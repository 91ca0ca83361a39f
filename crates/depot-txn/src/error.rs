use std::path::PathBuf;

use thiserror::Error;

use crate::manager::TransactionId;

/// Errors from transaction bookkeeping.
#[derive(Debug, Error)]
pub enum TxnError {
    /// An insert was recorded against a transaction that is not open.
    #[error("transaction {0} is not open")]
    NotOpen(TransactionId),

    /// The marker root lock could not be acquired.
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A marker owner record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;
