//! Named in-memory databases and the save path into them.

use crate::error::{InMemoryError, InMemoryResult};
use async_trait::async_trait;
use dashmap::DashMap;
use keel_core::{ContextResult, Database, EntityState, PendingChange, Value};
use keel_log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

type Row = BTreeMap<String, Value>;

/// Contents of one named database.
#[derive(Default)]
pub struct InMemoryStorage {
    name: String,
    tables: Mutex<HashMap<String, BTreeMap<Value, Row>>>,
    counters: DashMap<(String, String), i64>,
}

impl InMemoryStorage {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored rows of `entity_type`.
    pub fn row_count(&self, entity_type: &str) -> usize {
        self.tables.lock().get(entity_type).map_or(0, BTreeMap::len)
    }

    /// Stored values of the `entity_type` row with `key`.
    pub fn row(&self, entity_type: &str, key: &Value) -> Option<Row> {
        self.tables
            .lock()
            .get(entity_type)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// Next generated value for `entity_type.property`, counting from one.
    pub fn next_value(&self, entity_type: &str, property: &str) -> i64 {
        let mut counter = self
            .counters
            .entry((entity_type.to_string(), property.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    /// Apply `changes` as one unit: either every change is stored or none.
    ///
    /// Key values only appear in errors when `include_keys` is set.
    pub fn apply(&self, changes: &[PendingChange], include_keys: bool) -> InMemoryResult<usize> {
        let mut tables = self.tables.lock();
        let key_of = |change: &PendingChange| include_keys.then(|| change.key.clone());

        let mut staged = tables.clone();
        for change in changes {
            let table = staged.entry(change.entity_type.clone()).or_default();
            match change.state {
                EntityState::Added => {
                    if table.contains_key(&change.key) {
                        return Err(InMemoryError::DuplicateKey {
                            entity_type: change.entity_type.clone(),
                            key: key_of(change),
                        });
                    }
                    table.insert(change.key.clone(), change.values.clone());
                }
                EntityState::Modified => match table.get_mut(&change.key) {
                    Some(row) => *row = change.values.clone(),
                    None => {
                        return Err(InMemoryError::MissingRow {
                            entity_type: change.entity_type.clone(),
                            key: key_of(change),
                        });
                    }
                },
                EntityState::Deleted => {
                    if table.remove(&change.key).is_none() {
                        return Err(InMemoryError::MissingRow {
                            entity_type: change.entity_type.clone(),
                            key: key_of(change),
                        });
                    }
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }

        *tables = staged;
        trace!("Stored {} changes in in-memory database '{}'", changes.len(), self.name);
        Ok(changes.len())
    }

    /// Drop every row and reset generated values.
    pub fn clear(&self) {
        self.tables.lock().clear();
        self.counters.clear();
    }
}

impl fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("name", &self.name)
            .field("tables", &self.tables.lock().len())
            .finish()
    }
}

/// Every named database of one internal provider, or of every provider the
/// cache is handed to with `InMemoryStore::with_root`.
#[derive(Debug, Default)]
pub struct InMemoryStoreCache {
    databases: DashMap<String, Arc<InMemoryStorage>>,
}

impl InMemoryStoreCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Database named `name`, created on first use.
    pub fn database(&self, name: &str) -> Arc<InMemoryStorage> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating in-memory database '{}'", name);
                Arc::new(InMemoryStorage::new(name))
            })
            .clone()
    }

    /// Number of databases created.
    pub fn len(&self) -> usize {
        self.databases.len()
    }

    /// Whether no database was created yet.
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

/// [`Database`] writing into one named in-memory database.
pub struct InMemoryDatabase {
    storage: Arc<InMemoryStorage>,
    sensitive_data_logging: bool,
}

impl InMemoryDatabase {
    /// Save into `storage`.
    pub fn new(storage: Arc<InMemoryStorage>, sensitive_data_logging: bool) -> Self {
        Self {
            storage,
            sensitive_data_logging,
        }
    }

    /// Underlying storage.
    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    fn save_changes(&self, changes: &[PendingChange]) -> ContextResult<usize> {
        Ok(self.storage.apply(changes, self.sensitive_data_logging)?)
    }
}
