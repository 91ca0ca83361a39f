use thiserror::Error;

/// Errors produced by parsing or constructing foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid manifest key {0:?}: expected name:tag")]
    InvalidManifestKey(String),
}
