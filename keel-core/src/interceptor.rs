//! Interception hooks.

use crate::context::ContextId;
use crate::error::ContextResult;

/// Observes saves of one context.
///
/// Added per context with `add_interceptor`; not part of the internal
/// provider, so contexts with different interceptors still share it.
pub trait SaveChangesInterceptor: Send + Sync {
    /// Called before pending changes are sent to the store. Returning an
    /// error aborts the save with nothing written.
    fn saving_changes(&self, context: ContextId, pending: usize) -> ContextResult<()> {
        let _ = (context, pending);
        Ok(())
    }

    /// Called after the store accepted the changes.
    fn saved_changes(&self, context: ContextId, saved: usize) {
        let _ = (context, saved);
    }
}

/// Interceptor registered as a singleton in the internal provider.
///
/// Added with `add_singleton_interceptor`; the internal provider is keyed on
/// the set of singleton interceptors.
pub trait SingletonInterceptor: Send + Sync {
    /// Called once each time a context finishes initializing.
    fn context_initialized(&self, context: ContextId) {
        let _ = context;
    }
}
