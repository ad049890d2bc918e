//! Context pooling.
//!
//! A pool keeps initialized contexts between leases. Returning a context
//! clears its change tracker and ends the lease; renting it again starts a
//! new lease with the same internal scope.

use crate::context::{ContextDefinition, DbContext};
use crate::error::{ContextError, ContextResult};
use crate::options::ContextOptions;
use crate::registration::select_constructor;
use keel_di::{DiError, Dispose, ServiceProvider, WeakServiceProvider};
use keel_log::{debug, trace};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    max_size: usize,
}

impl PoolOptions {
    /// Idle contexts kept by default.
    pub const DEFAULT_SIZE: usize = 1024;

    /// Default sizing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options from environment variables.
    ///
    /// - `KEEL_POOL_SIZE`: maximum number of idle contexts kept
    pub fn from_env() -> Self {
        let max_size = std::env::var("KEEL_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_SIZE);
        Self { max_size }
    }

    /// Keep at most `size` idle contexts.
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Maximum number of idle contexts.
    pub fn size(&self) -> usize {
        self.max_size
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: Self::DEFAULT_SIZE,
        }
    }
}

/// Idle pooled contexts of type `C`.
pub struct ContextPool<C: ContextDefinition> {
    options: Arc<ContextOptions>,
    provider: WeakServiceProvider,
    idle: Mutex<Vec<Arc<DbContext<C>>>>,
    max_size: usize,
    disposed: AtomicBool,
}

impl<C: ContextDefinition> ContextPool<C> {
    /// Pool creating contexts with `options`, activating them against
    /// `provider`.
    pub fn new(options: Arc<ContextOptions>, provider: &ServiceProvider, pool: PoolOptions) -> Self {
        Self {
            options,
            provider: provider.downgrade(),
            idle: Mutex::new(Vec::new()),
            max_size: pool.size(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Take an idle context, or create one.
    pub fn rent(&self) -> ContextResult<Arc<DbContext<C>>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ContextError::Disposed);
        }
        if let Some(context) = self.idle.lock().pop() {
            context.renew_lease();
            trace!("Leased pooled context {}", context.context_id());
            return Ok(context);
        }

        let provider = self
            .provider
            .upgrade()
            .ok_or(ContextError::Di(DiError::Disposed))?;
        let resolver = provider.resolver();
        let constructor = select_constructor::<C>(&resolver, true)?;
        let context = DbContext::pooled(constructor.build(&resolver)?, self.options.clone())?;
        debug!("Created pooled context {}", context.context_id());
        Ok(Arc::new(context))
    }

    /// Take `context` back. It is kept for reuse while there is room,
    /// disposed otherwise.
    pub fn return_context(&self, context: Arc<DbContext<C>>) {
        if !context.end_lease() {
            return;
        }
        let mut idle = self.idle.lock();
        if self.disposed.load(Ordering::Acquire) || idle.len() >= self.max_size {
            drop(idle);
            context.dispose();
            return;
        }
        trace!("Returned pooled context {}", context.context_id());
        idle.push(context);
    }

    /// Number of idle contexts.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Maximum number of idle contexts.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<C: ContextDefinition> Dispose for ContextPool<C> {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle = std::mem::take(&mut *self.idle.lock());
        debug!("Disposing context pool ({} idle)", idle.len());
        for context in idle {
            context.dispose();
        }
    }
}

/// A context leased from a [`ContextPool`], returned on release or drop.
pub struct PooledContext<C: ContextDefinition> {
    context: Arc<DbContext<C>>,
    pool: Weak<ContextPool<C>>,
    released: AtomicBool,
}

impl<C: ContextDefinition> PooledContext<C> {
    /// Lease a context from `pool`.
    pub fn rent(pool: &Arc<ContextPool<C>>) -> ContextResult<Self> {
        Ok(Self {
            context: pool.rent()?,
            pool: Arc::downgrade(pool),
            released: AtomicBool::new(false),
        })
    }

    /// Leased context.
    pub fn context(&self) -> &Arc<DbContext<C>> {
        &self.context
    }

    /// End the lease. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.pool.upgrade() {
            Some(pool) => pool.return_context(self.context.clone()),
            None => self.context.dispose(),
        }
    }
}

impl<C: ContextDefinition> Deref for PooledContext<C> {
    type Target = DbContext<C>;

    fn deref(&self) -> &DbContext<C> {
        &self.context
    }
}

impl<C: ContextDefinition> Drop for PooledContext<C> {
    fn drop(&mut self) {
        self.release();
    }
}
