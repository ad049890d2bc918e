//! Key generation backed by the in-memory database.

use crate::database::InMemoryStorage;
use keel_core::{ContextResult, Value, ValueGenerator};
use std::sync::Arc;

/// Generates integer keys from counters kept with the database, so
/// contexts saving into the same named database never hand out the same
/// key twice.
pub struct InMemoryIntegerValueGenerator {
    storage: Arc<InMemoryStorage>,
}

impl InMemoryIntegerValueGenerator {
    /// Generator drawing from `storage`'s counters.
    pub fn new(storage: Arc<InMemoryStorage>) -> Self {
        Self { storage }
    }
}

impl ValueGenerator for InMemoryIntegerValueGenerator {
    fn next(&self, entity_type: &str, property: &str) -> ContextResult<Value> {
        Ok(Value::Int(self.storage.next_value(entity_type, property)))
    }
}
