//! Cache of internal service providers keyed by configuration.

use crate::cache::MemoryCache;
use crate::error::ContextResult;
use crate::options::{ContextOptions, WarningsConfiguration};
use keel_di::{ServiceKey, ServiceProvider};
use keel_log::{LoggerFactory, debug, trace};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Collaborators an internal provider is built with.
///
/// Explicit options win; otherwise the application provider's logger factory
/// and memory cache are adopted when it registers them.
#[derive(Clone, Default)]
pub struct EffectiveServices {
    /// Logger factory to register, if any
    pub logger_factory: Option<Arc<dyn LoggerFactory>>,
    /// Memory cache to register, if any
    pub memory_cache: Option<Arc<MemoryCache>>,
}

impl EffectiveServices {
    /// Resolve the collaborators for `options`.
    pub fn resolve(options: &ContextOptions) -> ContextResult<Self> {
        let application = options
            .application_service_provider()
            .and_then(|weak| weak.upgrade());

        let logger_factory = match (options.logger_factory(), &application) {
            (Some(factory), _) => Some(factory.clone()),
            (None, Some(app)) if app.contains::<dyn LoggerFactory>() => {
                app.get::<dyn LoggerFactory>()?
            }
            _ => None,
        };

        let memory_cache = match (options.memory_cache(), &application) {
            (Some(cache), _) => Some(cache.clone()),
            (None, Some(app)) if app.contains::<MemoryCache>() => app.get::<MemoryCache>()?,
            _ => None,
        };

        Ok(Self {
            logger_factory,
            memory_cache,
        })
    }
}

fn address<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// Structural identity of the parts of a configuration that change which
/// services an internal provider contains.
///
/// Collaborators supplied as instances are compared by identity, everything
/// else by value. Per-context settings (save interceptors, the application
/// provider's scope) are left out so contexts that differ only in them share
/// a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionsFingerprint {
    store: Option<String>,
    replacements: Vec<(ServiceKey, Option<&'static str>, &'static str)>,
    logger_factory: Option<usize>,
    memory_cache: Option<usize>,
    model: Option<usize>,
    application_root: Option<u64>,
    sensitive_data_logging: bool,
    warnings: WarningsConfiguration,
    singleton_interceptors: Vec<usize>,
}

impl OptionsFingerprint {
    /// Fingerprint `options` built with `effective` collaborators.
    pub fn new(options: &ContextOptions, effective: &EffectiveServices) -> Self {
        Self {
            store: options.store().map(|s| s.service_fingerprint()),
            replacements: options
                .replacements()
                .iter()
                .map(|r| (r.key(), r.current(), r.implementation()))
                .collect(),
            logger_factory: effective.logger_factory.as_ref().map(address),
            memory_cache: effective.memory_cache.as_ref().map(address),
            model: options.model().map(address),
            application_root: options
                .application_service_provider()
                .and_then(|weak| weak.root_id()),
            sensitive_data_logging: options.sensitive_data_logging(),
            warnings: options.warnings().clone(),
            singleton_interceptors: options.singleton_interceptors().iter().map(address).collect(),
        }
    }
}

static SHARED: Lazy<Arc<ServiceProviderCache>> = Lazy::new(|| Arc::new(ServiceProviderCache::new()));

/// Maps configuration fingerprints to built internal providers.
///
/// Contexts use [`ServiceProviderCache::shared`] unless their options name a
/// cache with `use_service_provider_cache`; tests that need isolation pass
/// their own instance.
#[derive(Default)]
pub struct ServiceProviderCache {
    providers: Mutex<HashMap<OptionsFingerprint, ServiceProvider>>,
}

impl ServiceProviderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default cache.
    pub fn shared() -> Arc<ServiceProviderCache> {
        SHARED.clone()
    }

    /// Provider for `fingerprint`, building it with `build` on a miss.
    ///
    /// `build` runs without the cache lock held; if two callers race, the
    /// first provider stored wins and the other is dropped.
    pub fn get_or_add(
        &self,
        fingerprint: OptionsFingerprint,
        build: impl FnOnce() -> ContextResult<ServiceProvider>,
    ) -> ContextResult<ServiceProvider> {
        if let Some(provider) = self.providers.lock().get(&fingerprint) {
            if !provider.is_disposed() {
                trace!("Service provider cache hit (provider {})", provider.root_id());
                return Ok(provider.clone());
            }
        }

        let built = build()?;
        let mut providers = self.providers.lock();
        let provider = providers
            .entry(fingerprint)
            .and_modify(|existing| {
                if existing.is_disposed() {
                    *existing = built.clone();
                }
            })
            .or_insert_with(|| built.clone())
            .clone();
        debug!(
            "Service provider cache miss, {} providers cached",
            providers.len()
        );
        Ok(provider)
    }

    /// Number of cached providers.
    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }

    /// Drop every cached provider.
    pub fn clear(&self) {
        self.providers.lock().clear();
    }
}
