//! Entity state tracking and relationship fix-up.
//!
//! - [`StateManager`]: the scoped tracker holding one [`InternalEntry`] per object
//! - [`EntityEntry`]: public handle onto an entry
//! - [`NavigationFixer`]: keeps foreign keys and navigations consistent
//! - [`EntityStateListener`]: hook notified of every state assignment

mod entry;
mod fixup;
mod graph;
mod listener;
mod state;
mod state_manager;

pub use entry::{EntityEntry, InternalEntry};
pub use fixup::NavigationFixer;
pub use listener::{EntityStateListener, StateChangeLogger};
pub use state::{EntityState, GraphOperation};
pub use state_manager::StateManager;
