//! # Keel In-Memory
//!
//! In-memory store for keel contexts, for tests and prototypes.
//!
//! Saved rows live in named databases held by the internal provider. There
//! is no query support: the store checks keys on save and keeps rows so
//! tests can inspect what was written.
//!
//! ## Quick Start
//!
//! ```rust
//! use keel_core::{ContextDefinition, ContextOptionsBuilder, DbContext, EntityObject, ModelBuilder};
//! use keel_inmemory::{InMemoryOptionsExt, InMemoryStorage};
//! use std::sync::Arc;
//!
//! struct Blogging;
//!
//! impl ContextDefinition for Blogging {
//!     fn on_model_creating(&self, model: &mut ModelBuilder) {
//!         model.entity("Blog").generated_key("Id");
//!     }
//! }
//!
//! let options = ContextOptionsBuilder::for_context::<Blogging>()
//!     .use_in_memory_database("quick-start")
//!     .build();
//! let context = DbContext::with_options(Blogging, Arc::new(options)).unwrap();
//!
//! context.add(&EntityObject::new("Blog").with("Title", "Hello").into_ref()).unwrap();
//! assert_eq!(context.save_changes().unwrap(), 1);
//!
//! let storage = context.get_service::<InMemoryStorage>().unwrap();
//! assert_eq!(storage.row_count("Blog"), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod database;
mod error;
mod store;
mod value_generation;

pub use database::{InMemoryDatabase, InMemoryStorage, InMemoryStoreCache};
pub use error::{InMemoryError, InMemoryResult};
pub use store::{InMemoryOptionsExt, InMemoryServicesExt, InMemoryStore};
pub use value_generation::InMemoryIntegerValueGenerator;
