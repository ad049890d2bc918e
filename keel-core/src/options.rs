//! Context configuration.
//!
//! [`ContextOptions`] is immutable once built. Contexts receive it through
//! their constructor, through a container registration, or build it
//! themselves in `on_configuring`.

use crate::cache::MemoryCache;
use crate::interceptor::{SaveChangesInterceptor, SingletonInterceptor};
use crate::metadata::Model;
use crate::provider_cache::ServiceProviderCache;
use crate::store::StoreProvider;
use keel_di::{
    DiResult, Lifetime, Resolver, ServiceDescriptor, ServiceKey, ServiceProvider,
    WeakServiceProvider,
};
use keel_log::{Level, LoggerFactory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

// ============================================================================
// Diagnostics events
// ============================================================================

/// Diagnostic events raised by contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoreEventId {
    /// Sensitive data logging was enabled for a context.
    SensitiveDataLoggingEnabled,
    /// An internal service provider was built.
    ServiceProviderCreated,
    /// A context finished initializing.
    ContextInitialized,
    /// An entity started being tracked.
    StartedTracking,
    /// A tracked entity changed state.
    StateChanged,
    /// Relationship fix-up linked a dependent to a principal.
    ForeignKeyFixedUp,
    /// Changes were saved.
    SaveChangesCompleted,
    /// A context was disposed.
    ContextDisposed,
}

impl CoreEventId {
    /// Event name.
    pub fn name(self) -> &'static str {
        match self {
            CoreEventId::SensitiveDataLoggingEnabled => "SensitiveDataLoggingEnabled",
            CoreEventId::ServiceProviderCreated => "ServiceProviderCreated",
            CoreEventId::ContextInitialized => "ContextInitialized",
            CoreEventId::StartedTracking => "StartedTracking",
            CoreEventId::StateChanged => "StateChanged",
            CoreEventId::ForeignKeyFixedUp => "ForeignKeyFixedUp",
            CoreEventId::SaveChangesCompleted => "SaveChangesCompleted",
            CoreEventId::ContextDisposed => "ContextDisposed",
        }
    }

    /// Level the event is logged at.
    pub fn level(self) -> Level {
        match self {
            CoreEventId::SensitiveDataLoggingEnabled => Level::Warn,
            CoreEventId::ContextInitialized => Level::Info,
            CoreEventId::ServiceProviderCreated
            | CoreEventId::SaveChangesCompleted
            | CoreEventId::ContextDisposed
            | CoreEventId::ForeignKeyFixedUp => Level::Debug,
            CoreEventId::StartedTracking | CoreEventId::StateChanged => Level::Trace,
        }
    }

    /// Logger category the event is written to.
    pub fn category(self) -> &'static str {
        match self {
            CoreEventId::SensitiveDataLoggingEnabled
            | CoreEventId::ServiceProviderCreated
            | CoreEventId::ContextInitialized
            | CoreEventId::ContextDisposed => "keel.infrastructure",
            CoreEventId::StartedTracking
            | CoreEventId::StateChanged
            | CoreEventId::ForeignKeyFixedUp => "keel.change_tracking",
            CoreEventId::SaveChangesCompleted => "keel.update",
        }
    }

    /// Whether the event is a warning.
    pub fn is_warning(self) -> bool {
        self.level() == Level::Warn
    }
}

impl fmt::Display for CoreEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do when an event is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningBehavior {
    /// Write the event to its logger
    #[default]
    Log,
    /// Drop the event
    Ignore,
    /// Fail the operation with `ContextError::WarningAsError`
    Throw,
}

/// How diagnostic events are handled.
///
/// The default behavior applies to warnings; per-event overrides apply to
/// any event.
///
/// ```rust
/// use keel_core::{CoreEventId, WarningBehavior, WarningsConfiguration};
///
/// let warnings = WarningsConfiguration::new().throw(CoreEventId::SensitiveDataLoggingEnabled);
/// assert_eq!(
///     warnings.behavior_for(CoreEventId::SensitiveDataLoggingEnabled),
///     WarningBehavior::Throw
/// );
///
/// let parsed = WarningsConfiguration::from_json(r#"{"default_behavior":"ignore"}"#).unwrap();
/// assert_eq!(parsed.behavior_for(CoreEventId::SensitiveDataLoggingEnabled), WarningBehavior::Ignore);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WarningsConfiguration {
    #[serde(default)]
    default_behavior: WarningBehavior,
    #[serde(default)]
    overrides: BTreeMap<CoreEventId, WarningBehavior>,
}

impl WarningsConfiguration {
    /// Log every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Render the configuration as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Set the behavior for warnings without an override.
    pub fn default_behavior(mut self, behavior: WarningBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Fail when `event` is raised.
    pub fn throw(self, event: CoreEventId) -> Self {
        self.with(event, WarningBehavior::Throw)
    }

    /// Drop `event`.
    pub fn ignore(self, event: CoreEventId) -> Self {
        self.with(event, WarningBehavior::Ignore)
    }

    /// Log `event`.
    pub fn log(self, event: CoreEventId) -> Self {
        self.with(event, WarningBehavior::Log)
    }

    fn with(mut self, event: CoreEventId, behavior: WarningBehavior) -> Self {
        self.overrides.insert(event, behavior);
        self
    }

    /// Behavior applied to `event`.
    pub fn behavior_for(&self, event: CoreEventId) -> WarningBehavior {
        match self.overrides.get(&event) {
            Some(behavior) => *behavior,
            None if event.is_warning() => self.default_behavior,
            None => WarningBehavior::Log,
        }
    }
}

// ============================================================================
// Service replacement
// ============================================================================

/// A `replace_service` directive.
#[derive(Clone, Debug)]
pub struct ServiceReplacement {
    descriptor: ServiceDescriptor,
    current: Option<&'static str>,
}

impl ServiceReplacement {
    /// Service key being replaced.
    pub fn key(&self) -> ServiceKey {
        self.descriptor.key()
    }

    /// Implementation being replaced; `None` replaces every registration.
    pub fn current(&self) -> Option<&'static str> {
        self.current
    }

    /// Replacement implementation name.
    pub fn implementation(&self) -> &'static str {
        self.descriptor.implementation()
    }

    /// Replacement registration, with the lifetime used when nothing is replaced.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }
}

// ============================================================================
// Options
// ============================================================================

/// Immutable context configuration.
#[derive(Clone)]
pub struct ContextOptions {
    context_type: Option<&'static str>,
    store: Option<Arc<dyn StoreProvider>>,
    internal_service_provider: Option<ServiceProvider>,
    application_service_provider: Option<WeakServiceProvider>,
    logger_factory: Option<Arc<dyn LoggerFactory>>,
    memory_cache: Option<Arc<MemoryCache>>,
    model: Option<Arc<Model>>,
    replacements: Vec<ServiceReplacement>,
    sensitive_data_logging: bool,
    warnings: WarningsConfiguration,
    interceptors: Vec<Arc<dyn SaveChangesInterceptor>>,
    singleton_interceptors: Vec<Arc<dyn SingletonInterceptor>>,
    service_provider_caching: bool,
    service_provider_cache: Option<Arc<ServiceProviderCache>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            context_type: None,
            store: None,
            internal_service_provider: None,
            application_service_provider: None,
            logger_factory: None,
            memory_cache: None,
            model: None,
            replacements: Vec::new(),
            sensitive_data_logging: false,
            warnings: WarningsConfiguration::default(),
            interceptors: Vec::new(),
            singleton_interceptors: Vec::new(),
            service_provider_caching: true,
            service_provider_cache: None,
        }
    }
}

impl ContextOptions {
    /// Context type the options were built for; `None` fits any context.
    pub fn context_type(&self) -> Option<&'static str> {
        self.context_type
    }

    /// Configured store.
    pub fn store(&self) -> Option<&Arc<dyn StoreProvider>> {
        self.store.as_ref()
    }

    /// Store of type `S`, if that is the configured store.
    pub fn store_as<S: StoreProvider + 'static>(&self) -> Option<&S> {
        self.store.as_ref()?.as_any().downcast_ref::<S>()
    }

    /// Externally owned provider the context takes its services from.
    pub fn internal_service_provider(&self) -> Option<&ServiceProvider> {
        self.internal_service_provider.as_ref()
    }

    /// Application provider used as a fallback by `get_service`.
    pub fn application_service_provider(&self) -> Option<&WeakServiceProvider> {
        self.application_service_provider.as_ref()
    }

    /// Explicit logger factory.
    pub fn logger_factory(&self) -> Option<&Arc<dyn LoggerFactory>> {
        self.logger_factory.as_ref()
    }

    /// Explicit memory cache.
    pub fn memory_cache(&self) -> Option<&Arc<MemoryCache>> {
        self.memory_cache.as_ref()
    }

    /// Prebuilt model.
    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    /// `replace_service` directives in the order they were given.
    pub fn replacements(&self) -> &[ServiceReplacement] {
        &self.replacements
    }

    /// Whether key values may appear in logs and errors.
    pub fn sensitive_data_logging(&self) -> bool {
        self.sensitive_data_logging
    }

    /// Diagnostic event handling.
    pub fn warnings(&self) -> &WarningsConfiguration {
        &self.warnings
    }

    /// Per-context save interceptors.
    pub fn interceptors(&self) -> &[Arc<dyn SaveChangesInterceptor>] {
        &self.interceptors
    }

    /// Interceptors registered in the internal provider.
    pub fn singleton_interceptors(&self) -> &[Arc<dyn SingletonInterceptor>] {
        &self.singleton_interceptors
    }

    /// Whether internal providers are cached across contexts.
    pub fn service_provider_caching(&self) -> bool {
        self.service_provider_caching
    }

    /// Cache internal providers are kept in.
    pub fn service_provider_cache(&self) -> Arc<ServiceProviderCache> {
        self.service_provider_cache
            .clone()
            .unwrap_or_else(ServiceProviderCache::shared)
    }

    /// Whether a store or an external provider is configured.
    pub fn is_configured(&self) -> bool {
        self.store.is_some() || self.internal_service_provider.is_some()
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("context_type", &self.context_type)
            .field("store", &self.store)
            .field(
                "internal_service_provider",
                &self.internal_service_provider.is_some(),
            )
            .field("replacements", &self.replacements.len())
            .field("sensitive_data_logging", &self.sensitive_data_logging)
            .field("warnings", &self.warnings)
            .field("service_provider_caching", &self.service_provider_caching)
            .finish()
    }
}

/// Builds [`ContextOptions`].
///
/// Every setter counts as a change; pooled contexts use that to reject
/// `on_configuring` implementations that alter their options.
#[derive(Clone, Debug, Default)]
pub struct ContextOptionsBuilder {
    options: ContextOptions,
    changes: usize,
}

impl ContextOptionsBuilder {
    /// Options usable by any context type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for the context type `C`.
    pub fn for_context<C: 'static>() -> Self {
        let mut builder = Self::new();
        builder.options.context_type = Some(std::any::type_name::<C>());
        builder
    }

    /// Continue from existing options.
    pub fn from_options(options: &ContextOptions) -> Self {
        Self {
            options: options.clone(),
            changes: 0,
        }
    }

    fn touch(mut self) -> Self {
        self.changes += 1;
        self
    }

    /// Use `store`.
    pub fn use_store(mut self, store: Arc<dyn StoreProvider>) -> Self {
        self.options.store = Some(store);
        self.touch()
    }

    /// Take services from an externally owned provider instead of building one.
    pub fn use_internal_service_provider(mut self, provider: ServiceProvider) -> Self {
        self.options.internal_service_provider = Some(provider);
        self.touch()
    }

    /// Fall back to `provider` for services the context does not know.
    pub fn use_application_service_provider(mut self, provider: &ServiceProvider) -> Self {
        self.options.application_service_provider = Some(provider.downgrade());
        self.touch()
    }

    /// Use `factory` for the context's loggers.
    pub fn use_logger_factory(mut self, factory: Arc<dyn LoggerFactory>) -> Self {
        self.options.logger_factory = Some(factory);
        self.touch()
    }

    /// Use `cache` as the context's memory cache.
    pub fn use_memory_cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.options.memory_cache = Some(cache);
        self.touch()
    }

    /// Use a prebuilt model instead of `on_model_creating`.
    pub fn use_model(mut self, model: Arc<Model>) -> Self {
        self.options.model = Some(model);
        self.touch()
    }

    /// Replace every registration of `T` with `factory`, keeping each
    /// registration's lifetime. `I` names the implementation.
    pub fn replace_service<T, I, F>(mut self, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        I: ?Sized + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        self.options.replacements.push(ServiceReplacement {
            descriptor: ServiceDescriptor::new(Lifetime::Singleton, factory).implemented_by::<I>(),
            current: None,
        });
        self.touch()
    }

    /// Replace only the registration of `T` implemented by `Current`.
    pub fn replace_service_implementation<T, Current, New, F>(mut self, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        Current: ?Sized + 'static,
        New: ?Sized + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        self.options.replacements.push(ServiceReplacement {
            descriptor: ServiceDescriptor::new(Lifetime::Singleton, factory)
                .implemented_by::<New>(),
            current: Some(std::any::type_name::<Current>()),
        });
        self.touch()
    }

    /// Allow key values in logs and errors.
    pub fn enable_sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.options.sensitive_data_logging = enabled;
        self.touch()
    }

    /// Adjust diagnostic event handling.
    pub fn configure_warnings(
        mut self,
        configure: impl FnOnce(WarningsConfiguration) -> WarningsConfiguration,
    ) -> Self {
        self.options.warnings = configure(std::mem::take(&mut self.options.warnings));
        self.touch()
    }

    /// Add a per-context save interceptor.
    pub fn add_interceptor(mut self, interceptor: Arc<dyn SaveChangesInterceptor>) -> Self {
        self.options.interceptors.push(interceptor);
        self.touch()
    }

    /// Add an interceptor registered in the internal provider.
    pub fn add_singleton_interceptor(mut self, interceptor: Arc<dyn SingletonInterceptor>) -> Self {
        self.options.singleton_interceptors.push(interceptor);
        self.touch()
    }

    /// Cache internal providers across contexts (default `true`).
    pub fn enable_service_provider_caching(mut self, enabled: bool) -> Self {
        self.options.service_provider_caching = enabled;
        self.touch()
    }

    /// Keep internal providers in `cache` instead of the shared one.
    pub fn use_service_provider_cache(mut self, cache: Arc<ServiceProviderCache>) -> Self {
        self.options.service_provider_cache = Some(cache);
        self.touch()
    }

    /// Whether a store or an external provider is configured.
    pub fn is_configured(&self) -> bool {
        self.options.is_configured()
    }

    /// Number of setters called since the builder was created.
    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Options built so far.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Finish building.
    pub fn build(self) -> ContextOptions {
        self.options
    }
}

/// Options registered in a container for the context type `C`.
pub struct OptionsFor<C> {
    options: Arc<ContextOptions>,
    _context: PhantomData<fn() -> C>,
}

impl<C> OptionsFor<C> {
    /// Wrap `options`.
    pub fn new(options: ContextOptions) -> Self {
        Self {
            options: Arc::new(options),
            _context: PhantomData,
        }
    }

    /// Shared options.
    pub fn shared(&self) -> Arc<ContextOptions> {
        self.options.clone()
    }
}

impl<C> Deref for OptionsFor<C> {
    type Target = ContextOptions;

    fn deref(&self) -> &ContextOptions {
        &self.options
    }
}
