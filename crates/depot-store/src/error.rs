use depot_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The stored bytes no longer hash to the object's id.
    #[error("corrupt object {id}: content hashes to {computed}")]
    Corrupt { id: ObjectId, computed: ObjectId },

    /// The object exists but cannot be decoded as the expected type.
    #[error("invalid object {id}: {reason}")]
    InvalidObject { id: ObjectId, reason: String },

    /// A tree builder received the same key twice.
    #[error("duplicate tree entry: {0}")]
    DuplicateEntry(String),

    /// An insert hook refused to let the object be published.
    #[error("insert of {id} rejected: {reason}")]
    Rejected { id: ObjectId, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for errors that indicate damaged content.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::InvalidObject { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
