//! # Keel Core
//!
//! Unit-of-work contexts, change tracking and relationship fix-up.
//!
//! ## Features
//!
//! - **Lazy initialization**: a context builds or borrows its service scope on first use
//! - **Provider caching**: contexts with equivalent options share one internal provider
//! - **Change tracking**: one entry per object, graph-aware add/attach/update/remove
//! - **Relationship fix-up**: foreign keys and navigations kept consistent in both attach orders
//! - **Registration**: direct, factory and pooled contexts in an application container
//!
//! ## Quick Start
//!
//! ```rust
//! use keel_core::{ContextDefinition, ContextOptionsBuilder, DbContext, EntityObject, EntityState, ModelBuilder};
//! use std::sync::Arc;
//!
//! struct Shop;
//!
//! impl ContextDefinition for Shop {
//!     fn on_model_creating(&self, model: &mut ModelBuilder) {
//!         model.entity("Category").generated_key("Id");
//!     }
//! }
//!
//! let mut model = ModelBuilder::new();
//! Shop.on_model_creating(&mut model);
//! let options = ContextOptionsBuilder::for_context::<Shop>()
//!     .use_model(Arc::new(model.build()))
//!     .build();
//!
//! let context = DbContext::with_options(Shop, Arc::new(options)).unwrap();
//! let category = EntityObject::new("Category").into_ref();
//! let entry = context.attach(&category).unwrap();
//! assert_eq!(entry.state(), EntityState::Added);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod context;
mod diagnostics;
mod entity;
mod error;
mod factory;
mod interceptor;
mod metadata;
mod options;
mod pool;
mod provider_cache;
mod registration;
mod services;
mod store;
pub mod tracking;
mod value_generation;

pub use cache::MemoryCache;
pub use context::{ContextConstructor, ContextDefinition, ContextId, ContextServices, DbContext};
pub use diagnostics::DiagnosticsLogger;
pub use entity::{EntityObject, EntityRef, Value};
pub use error::{ContextError, ContextResult};
pub use factory::ContextFactory;
pub use interceptor::{SaveChangesInterceptor, SingletonInterceptor};
pub use metadata::{
    DefaultModelCustomizer, EntityMetadata, EntityTypeBuilder, ForeignKeyMetadata, KeyMetadata,
    MetadataProvider, Model, ModelBuilder, ModelCustomizer, ModelSource,
};
pub use options::{
    ContextOptions, ContextOptionsBuilder, CoreEventId, OptionsFor, ServiceReplacement,
    WarningBehavior, WarningsConfiguration,
};
pub use pool::{ContextPool, PoolOptions, PooledContext};
pub use provider_cache::{EffectiveServices, OptionsFingerprint, ServiceProviderCache};
pub use registration::ServiceCollectionExt;
pub use services::{CoreServices, CoreServicesExt, CurrentContext, SingletonOptions};
pub use store::{Database, PendingChange, StoreProvider};
pub use tracking::{
    EntityEntry, EntityState, EntityStateListener, GraphOperation, InternalEntry,
    NavigationFixer, StateChangeLogger, StateManager,
};
pub use value_generation::{SequentialValueGenerator, ValueGenerator};

/// Prelude module for commonly used types.
pub mod prelude {
    pub use super::{
        ContextConstructor, ContextDefinition, ContextError, ContextOptions,
        ContextOptionsBuilder, ContextResult, CoreServicesExt, DbContext, EntityObject,
        EntityRef, EntityState, ModelBuilder, ServiceCollectionExt, Value,
    };
}
