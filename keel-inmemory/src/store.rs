//! The in-memory store provider and its registrations.

use crate::database::{InMemoryDatabase, InMemoryStorage, InMemoryStoreCache};
use crate::error::InMemoryError;
use crate::value_generation::InMemoryIntegerValueGenerator;
use keel_core::{ContextOptionsBuilder, CurrentContext, Database, StoreProvider, ValueGenerator};
use keel_di::{DiError, DiResult, Resolver, ServiceCollection, ServiceDescriptor};
use keel_log::trace;
use std::any::Any;
use std::sync::Arc;

/// Selects a named in-memory database.
///
/// Contexts using in-memory stores share one internal provider whatever
/// their database names; the name is read when a scope saves or generates
/// keys.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    database_name: String,
    root: Option<Arc<InMemoryStoreCache>>,
}

impl InMemoryStore {
    /// Database used when none is named.
    pub const DEFAULT_DATABASE: &'static str = "keel";

    /// Store for the database named `database_name`.
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            root: None,
        }
    }

    /// Create a store from environment variables.
    ///
    /// - `KEEL_INMEMORY_DATABASE`: database name (default `keel`)
    pub fn from_env() -> Self {
        let name = std::env::var("KEEL_INMEMORY_DATABASE")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_DATABASE.to_string());
        Self::new(name)
    }

    /// Keep databases in `root` instead of the internal provider, so
    /// contexts with different internal providers see the same data.
    pub fn with_root(mut self, root: Arc<InMemoryStoreCache>) -> Self {
        self.root = Some(root);
        self
    }

    /// Database name.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DATABASE)
    }
}

impl StoreProvider for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn register_services(&self, services: &mut ServiceCollection) {
        if let Some(root) = &self.root {
            services.try_add(ServiceDescriptor::instance(root.clone()));
        }
        services.add_keel_in_memory_database();
    }

    fn service_fingerprint(&self) -> String {
        match &self.root {
            Some(root) => format!("{}@{:p}", self.name(), Arc::as_ptr(root)),
            None => self.name().to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Configures a context to use an in-memory database.
pub trait InMemoryOptionsExt {
    /// Save into the in-memory database named `database_name`.
    fn use_in_memory_database(self, database_name: impl Into<String>) -> Self;
}

impl InMemoryOptionsExt for ContextOptionsBuilder {
    fn use_in_memory_database(self, database_name: impl Into<String>) -> Self {
        self.use_store(Arc::new(InMemoryStore::new(database_name)))
    }
}

/// Registers the in-memory store services.
pub trait InMemoryServicesExt {
    /// Add the in-memory services not already registered. Use this when
    /// building a provider passed to `use_internal_service_provider`.
    fn add_keel_in_memory_database(&mut self) -> &mut Self;
}

fn storage(r: &Resolver<'_>) -> DiResult<Arc<InMemoryStorage>> {
    let options = r.get_required::<CurrentContext>()?.options();
    let store = options
        .store_as::<InMemoryStore>()
        .ok_or_else(|| DiError::activation("InMemoryStorage", InMemoryError::NotConfigured))?;
    Ok(r.get_required::<InMemoryStoreCache>()?
        .database(store.database_name()))
}

impl InMemoryServicesExt for ServiceCollection {
    fn add_keel_in_memory_database(&mut self) -> &mut Self {
        self.try_add(ServiceDescriptor::singleton::<InMemoryStoreCache, _>(|_| {
            Ok(Arc::new(InMemoryStoreCache::new()))
        }));
        self.try_add(ServiceDescriptor::scoped::<InMemoryStorage, _>(storage));
        self.try_add(
            ServiceDescriptor::scoped::<dyn Database, _>(|r| {
                let sensitive = r
                    .get_required::<CurrentContext>()?
                    .options()
                    .sensitive_data_logging();
                let database = InMemoryDatabase::new(r.get_required::<InMemoryStorage>()?, sensitive);
                Ok(Arc::new(database) as Arc<dyn Database>)
            })
            .implemented_by::<InMemoryDatabase>(),
        );
        self.try_add(
            ServiceDescriptor::scoped::<dyn ValueGenerator, _>(|r| {
                let generator = InMemoryIntegerValueGenerator::new(r.get_required::<InMemoryStorage>()?);
                Ok(Arc::new(generator) as Arc<dyn ValueGenerator>)
            })
            .implemented_by::<InMemoryIntegerValueGenerator>(),
        );
        trace!("Registered in-memory store services");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_database_name() {
        let a = InMemoryStore::new("a");
        let b = InMemoryStore::new("b");
        assert_eq!(a.service_fingerprint(), b.service_fingerprint());

        let rooted = InMemoryStore::new("a").with_root(Arc::new(InMemoryStoreCache::new()));
        assert_ne!(a.service_fingerprint(), rooted.service_fingerprint());
    }

    #[test]
    fn test_default_database() {
        assert_eq!(InMemoryStore::default().database_name(), "keel");
    }

    #[test]
    fn test_registers_store_services() {
        let mut services = ServiceCollection::new();
        services.add_keel_in_memory_database();

        assert!(services.contains::<InMemoryStoreCache>());
        assert!(services.contains::<dyn Database>());
        assert!(services.contains::<dyn ValueGenerator>());

        let before = services.len();
        services.add_keel_in_memory_database();
        assert_eq!(services.len(), before);
    }
}
