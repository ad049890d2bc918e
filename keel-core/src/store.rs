//! Store provider seams.
//!
//! A store plugs into a context in two places: it registers its services
//! into the internal provider ([`StoreProvider`]) and it receives pending
//! changes when the context saves ([`Database`]).

use crate::entity::{EntityRef, Value};
use crate::error::ContextResult;
use crate::tracking::EntityState;
use async_trait::async_trait;
use keel_di::ServiceCollection;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Selects and configures a store for a context.
pub trait StoreProvider: Send + Sync + fmt::Debug {
    /// Store name used in diagnostics.
    fn name(&self) -> &str;

    /// Register the store's services into the internal provider.
    ///
    /// Registrations should use `try_add` so services already present in an
    /// externally supplied provider win.
    fn register_services(&self, services: &mut ServiceCollection);

    /// Part of the configuration that changes what `register_services`
    /// registers.
    ///
    /// Contexts whose stores report the same fingerprint share an internal
    /// provider, so settings read at save time (a database name, say) must
    /// not be part of it.
    fn service_fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Downcast support for store-specific option lookups.
    fn as_any(&self) -> &dyn Any;
}

/// One entity's pending change, handed to the store on save.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// Entity being saved
    pub entity: EntityRef,
    /// Entity type name
    pub entity_type: String,
    /// State before saving
    pub state: EntityState,
    /// Primary key value
    pub key: Value,
    /// Property values at save time
    pub values: BTreeMap<String, Value>,
}

/// Applies pending changes to a store.
#[async_trait]
pub trait Database: Send + Sync {
    /// Apply `changes` and return the number of entities written.
    fn save_changes(&self, changes: &[PendingChange]) -> ContextResult<usize>;

    /// Asynchronous [`save_changes`](Self::save_changes).
    async fn save_changes_async(&self, changes: &[PendingChange]) -> ContextResult<usize> {
        self.save_changes(changes)
    }
}
