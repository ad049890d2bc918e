//! Values for store-generated keys.

use crate::entity::Value;
use crate::error::ContextResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Produces values for generated key properties of added entities.
///
/// Registered in the internal provider; stores register their own and
/// applications can swap it with `replace_service`.
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    /// Next value for `entity_type.property`.
    fn next(&self, entity_type: &str, property: &str) -> ContextResult<Value>;

    /// Asynchronous [`next`](Self::next).
    async fn next_async(&self, entity_type: &str, property: &str) -> ContextResult<Value> {
        self.next(entity_type, property)
    }
}

/// Counts up from one per entity type and property.
#[derive(Debug, Default)]
pub struct SequentialValueGenerator {
    counters: Mutex<HashMap<(String, String), i64>>,
}

impl SequentialValueGenerator {
    /// Create a generator with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueGenerator for SequentialValueGenerator {
    fn next(&self, entity_type: &str, property: &str) -> ContextResult<Value> {
        let mut counters = self.counters.lock();
        let counter = counters
            .entry((entity_type.to_string(), property.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(Value::Int(*counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_property() {
        let generator = SequentialValueGenerator::new();
        assert_eq!(generator.next("Blog", "Id").unwrap(), Value::Int(1));
        assert_eq!(generator.next("Blog", "Id").unwrap(), Value::Int(2));
        assert_eq!(generator.next("Post", "Id").unwrap(), Value::Int(1));
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let generator = SequentialValueGenerator::new();
        assert_eq!(generator.next_async("Blog", "Id").await.unwrap(), Value::Int(1));
        assert_eq!(generator.next("Blog", "Id").unwrap(), Value::Int(2));
    }
}
