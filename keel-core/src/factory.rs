//! Factory for caller-owned contexts.

use crate::context::{ContextDefinition, DbContext};
use crate::error::{ContextError, ContextResult};
use crate::options::ContextOptions;
use crate::registration::select_constructor;
use keel_di::{DiError, ServiceProvider, WeakServiceProvider};
use keel_log::trace;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Creates a new `DbContext<C>` per call.
///
/// Registered by `add_db_context_factory`. Contexts it creates belong to the
/// caller, who disposes them (or drops them); the container never does.
pub struct ContextFactory<C> {
    options: Arc<ContextOptions>,
    provider: WeakServiceProvider,
    _context: PhantomData<fn() -> C>,
}

impl<C: ContextDefinition> ContextFactory<C> {
    /// Factory creating contexts with `options`, activating them against
    /// `provider`.
    pub fn new(options: Arc<ContextOptions>, provider: &ServiceProvider) -> Self {
        Self {
            options,
            provider: provider.downgrade(),
            _context: PhantomData,
        }
    }

    /// Options handed to created contexts.
    pub fn options(&self) -> &Arc<ContextOptions> {
        &self.options
    }

    /// Create a context.
    pub fn create_context(&self) -> ContextResult<DbContext<C>> {
        let provider = self
            .provider
            .upgrade()
            .ok_or(ContextError::Di(DiError::Disposed))?;
        let resolver = provider.resolver();
        let constructor = select_constructor::<C>(&resolver, true)?;
        let definition = constructor.build(&resolver)?;
        let context = if constructor.accepts_options() {
            DbContext::with_options(definition, self.options.clone())?
        } else {
            DbContext::new(definition)
        };
        trace!("Factory created context {}", context.context_id());
        Ok(context)
    }
}

impl<C> fmt::Debug for ContextFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("context", &std::any::type_name::<C>())
            .field("provider", &self.provider)
            .finish()
    }
}
