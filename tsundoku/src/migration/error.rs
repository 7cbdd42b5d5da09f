use crate::catalog::{SourceError, StoreError};
use crate::primitives::key_value_store::KeyValueStoreError;

/// Errors surfaced by the migration engine.
#[crate::tsundoku_error]
pub enum MigrationError {
    /// The call is not allowed in the current state, e.g. a second bulk migration.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation was cancelled before it completed.
    #[error("Migration cancelled")]
    Cancelled,

    /// A referenced entry does not exist.
    #[error("Entry {entry_id} not found")]
    EntryNotFound {
        /// Id of the missing entry.
        entry_id: i64,
    },

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A catalog source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Key-value store operation failed
    #[error(transparent)]
    KeyValueStore(#[from] KeyValueStoreError),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {message}")]
    JsonError {
        /// The error message from serde_json
        message: String,
    },
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonError {
            message: e.to_string(),
        }
    }
}
