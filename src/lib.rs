// Keel - unit-of-work contexts for Rust
//
// This library combines a scoped service container with context lifecycle
// management, entity change tracking and relationship fix-up.

// Re-export core functionality
pub use keel_core::*;

// Re-export the container and logging crates
pub use keel_di;
pub use keel_log;

pub use keel_di::{
    DiError, DiResult, Dispose, Lifetime, ProviderOptions, Resolver, ServiceCollection,
    ServiceDescriptor, ServiceKey, ServiceProvider,
};
pub use keel_log::{ConsoleLoggerFactory, ListLoggerFactory, Logger, LoggerFactory};

// Re-export optional crates
#[cfg(feature = "inmemory")]
pub use keel_inmemory;

#[cfg(feature = "inmemory")]
pub use keel_inmemory::{InMemoryOptionsExt, InMemoryServicesExt, InMemoryStore};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ContextConstructor,
        ContextDefinition,
        ContextError,
        ContextOptions,
        ContextOptionsBuilder,
        ContextResult,
        CoreServicesExt,
        DbContext,
        EntityObject,
        EntityRef,
        EntityState,
        Lifetime,
        ModelBuilder,
        ServiceCollection,
        ServiceCollectionExt,
        ServiceProvider,
        Value,
    };

    #[cfg(feature = "inmemory")]
    pub use crate::InMemoryOptionsExt;
}
