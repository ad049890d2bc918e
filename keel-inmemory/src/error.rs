//! In-memory store errors.

use keel_core::{ContextError, Value};
use thiserror::Error;

/// Result type for in-memory store operations.
pub type InMemoryResult<T> = Result<T, InMemoryError>;

/// Errors raised while applying changes to an in-memory database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InMemoryError {
    /// An added entity's key is already stored.
    #[error("Cannot add '{entity_type}'{}: an instance with the same key is already stored", key_suffix(.key))]
    DuplicateKey {
        /// Entity type
        entity_type: String,
        /// Key value, when sensitive data logging is enabled
        key: Option<Value>,
    },

    /// A modified or deleted entity has no stored row.
    #[error("Cannot update or delete '{entity_type}'{}: no stored instance has that key", key_suffix(.key))]
    MissingRow {
        /// Entity type
        entity_type: String,
        /// Key value, when sensitive data logging is enabled
        key: Option<Value>,
    },

    /// The scope's context is not configured with an in-memory store.
    #[error("The context is not configured to use an in-memory database")]
    NotConfigured,
}

fn key_suffix(key: &Option<Value>) -> String {
    key.as_ref()
        .map(|k| format!(" with key '{}'", k))
        .unwrap_or_default()
}

impl From<InMemoryError> for ContextError {
    fn from(err: InMemoryError) -> Self {
        ContextError::store(err.to_string())
    }
}
