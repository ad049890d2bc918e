//! # Keel DI
//!
//! Scoped service container used by keel's unit-of-work layer.
//!
//! ## Features
//!
//! - **Three lifetimes**: singleton (per root), scoped (per scope) and transient
//! - **Multi-registration**: every registration for a key is resolvable with `get_all`
//! - **Replacement**: swap all registrations for a key, or one implementation
//! - **Scope validation**: catch scoped services resolved from the root or captured by singletons
//! - **Disposal**: scopes dispose what they created; roots dispose singletons
//!
//! ## Quick Start
//!
//! ```rust
//! use keel_di::{ProviderOptions, ServiceCollection};
//! use std::sync::Arc;
//!
//! struct Clock;
//! struct Session { clock: Arc<Clock> }
//!
//! let mut services = ServiceCollection::new();
//! services.add_singleton::<Clock, _>(|_| Ok(Arc::new(Clock)));
//! services.add_scoped::<Session, _>(|r| Ok(Arc::new(Session { clock: r.get_required()? })));
//!
//! let root = services.build_provider_with(ProviderOptions::new().validate_scopes(true));
//! let scope = root.create_scope().unwrap();
//!
//! let a = scope.get_required::<Session>().unwrap();
//! let b = scope.get_required::<Session>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! assert!(root.get_required::<Session>().is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collection;
mod descriptor;
mod dispose;
mod error;
mod key;
mod lifetime;
mod provider;
mod resolver;

pub use collection::*;
pub use descriptor::{AnyArc, ServiceDescriptor};
pub use dispose::Dispose;
pub use error::*;
pub use key::*;
pub use lifetime::*;
pub use provider::{ProviderOptions, ServiceProvider, WeakServiceProvider};
pub use resolver::*;

/// Prelude module for commonly used types.
pub mod prelude {
    pub use super::{
        DiError, DiResult, Dispose, Lifetime, ProviderOptions, Resolver, ServiceCollection,
        ServiceDescriptor, ServiceKey, ServiceProvider,
    };
}
