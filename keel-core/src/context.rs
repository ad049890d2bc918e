//! The unit of work.
//!
//! A [`DbContext`] wraps a user [`ContextDefinition`] and walks through
//! `Uninitialized -> Initialized -> Disposed`. Initialization runs lazily on
//! first use: the definition's `on_configuring` completes the options, an
//! internal provider is taken from the options or from the provider cache,
//! and a fresh scope of it supplies the context's services.

use crate::diagnostics::DiagnosticsLogger;
use crate::entity::EntityRef;
use crate::error::{ContextError, ContextResult};
use crate::interceptor::SingletonInterceptor;
use crate::metadata::{Model, ModelBuilder, ModelSource};
use crate::options::{ContextOptions, ContextOptionsBuilder, CoreEventId};
use crate::provider_cache::{EffectiveServices, OptionsFingerprint};
use crate::services::{CoreServices, CurrentContext, SingletonOptions, build_internal_provider};
use crate::store::{Database, PendingChange};
use crate::tracking::{EntityEntry, GraphOperation, StateManager};
use keel_di::{DiError, DiResult, Resolver, ServiceKey, ServiceProvider, short_type_name};
use keel_log::{debug, warn};
use parking_lot::Mutex;
use std::any::{TypeId, type_name};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use uuid::Uuid;

/// Identifies a context instance and the lease it is on.
///
/// The lease starts at zero and goes up each time a pooled instance is
/// handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    instance: Uuid,
    lease: u32,
}

impl ContextId {
    /// Instance identifier.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Lease number.
    pub fn lease(&self) -> u32 {
        self.lease
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.lease)
    }
}

/// A user context type.
///
/// ```rust
/// use keel_core::{ContextConstructor, ContextDefinition, ModelBuilder};
///
/// struct Shop;
///
/// impl ContextDefinition for Shop {
///     fn on_model_creating(&self, model: &mut ModelBuilder) {
///         model.entity("Category").key("Id");
///     }
///
///     fn constructors() -> Vec<ContextConstructor<Self>> {
///         vec![ContextConstructor::parameterless(|| Shop).with_options()]
///     }
/// }
/// ```
pub trait ContextDefinition: Send + Sync + Sized + 'static {
    /// Complete the options the context was created with.
    fn on_configuring(&self, options: ContextOptionsBuilder) -> ContextOptionsBuilder {
        options
    }

    /// Describe the entity types the context tracks.
    fn on_model_creating(&self, model: &mut ModelBuilder) {
        let _ = model;
    }

    /// Ways the container may construct the context.
    ///
    /// Contexts only ever created directly need none.
    fn constructors() -> Vec<ContextConstructor<Self>> {
        Vec::new()
    }
}

type Build<C> = Arc<dyn Fn(&Resolver<'_>) -> DiResult<C> + Send + Sync>;

/// One way of constructing a context from a container.
///
/// The container picks the most specific constructor (most dependencies,
/// options counting as one) whose dependencies are all registered.
pub struct ContextConstructor<C> {
    accepts_options: bool,
    dependencies: Vec<ServiceKey>,
    build: Build<C>,
}

impl<C: ContextDefinition> ContextConstructor<C> {
    /// Constructor resolving its dependencies through `build`.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> DiResult<C> + Send + Sync + 'static,
    {
        Self {
            accepts_options: false,
            dependencies: Vec::new(),
            build: Arc::new(build),
        }
    }

    /// Constructor without dependencies.
    pub fn parameterless<F>(build: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::new(move |_| Ok(build()))
    }

    /// The constructed context receives the options registered for it.
    pub fn with_options(mut self) -> Self {
        self.accepts_options = true;
        self
    }

    /// Declare a dependency on `T`.
    pub fn requires<T: ?Sized + 'static>(mut self) -> Self {
        self.dependencies.push(ServiceKey::of::<T>());
        self
    }

    /// Whether the constructor takes options.
    pub fn accepts_options(&self) -> bool {
        self.accepts_options
    }

    /// Declared dependencies.
    pub fn dependencies(&self) -> &[ServiceKey] {
        &self.dependencies
    }

    pub(crate) fn specificity(&self) -> usize {
        self.dependencies.len() + usize::from(self.accepts_options)
    }

    pub(crate) fn build(&self, resolver: &Resolver<'_>) -> DiResult<C> {
        (self.build)(resolver)
    }
}

impl<C> Clone for ContextConstructor<C> {
    fn clone(&self) -> Self {
        Self {
            accepts_options: self.accepts_options,
            dependencies: self.dependencies.clone(),
            build: self.build.clone(),
        }
    }
}

impl<C> fmt::Debug for ContextConstructor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConstructor")
            .field("accepts_options", &self.accepts_options)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Services an initialized context works with.
pub struct ContextServices {
    scope: ServiceProvider,
    options: Arc<ContextOptions>,
    state_manager: Arc<StateManager>,
    diagnostics: Arc<DiagnosticsLogger>,
}

impl ContextServices {
    /// Scope the services were resolved from.
    pub fn scope(&self) -> &ServiceProvider {
        &self.scope
    }

    /// Options after `on_configuring`.
    pub fn options(&self) -> &Arc<ContextOptions> {
        &self.options
    }

    /// Change tracker.
    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Diagnostics logger.
    pub fn diagnostics(&self) -> &Arc<DiagnosticsLogger> {
        &self.diagnostics
    }
}

enum Lifecycle {
    Uninitialized,
    Initialized(Arc<ContextServices>),
    Disposed,
}

/// A unit of work over a [`ContextDefinition`].
///
/// Not meant for concurrent use; the internal lock only makes the type
/// shareable. Dereferences to the definition.
pub struct DbContext<C: ContextDefinition> {
    definition: C,
    options: Option<Arc<ContextOptions>>,
    lifecycle: Mutex<Lifecycle>,
    instance: Uuid,
    lease: AtomicU32,
    leased: AtomicBool,
    pooled: bool,
}

impl<C: ContextDefinition> DbContext<C> {
    /// Context configured entirely by `on_configuring`.
    pub fn new(definition: C) -> Self {
        Self {
            definition,
            options: None,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            instance: Uuid::new_v4(),
            lease: AtomicU32::new(0),
            leased: AtomicBool::new(true),
            pooled: false,
        }
    }

    /// Context starting from `options`.
    ///
    /// Fails with [`ContextError::NonGenericConfiguration`] when the options
    /// were built for another context type.
    pub fn with_options(definition: C, options: Arc<ContextOptions>) -> ContextResult<Self> {
        if let Some(expected) = options.context_type()
            && expected != type_name::<C>()
        {
            return Err(ContextError::NonGenericConfiguration {
                expected,
                actual: type_name::<C>(),
            });
        }
        let mut context = Self::new(definition);
        context.options = Some(options);
        Ok(context)
    }

    pub(crate) fn pooled(definition: C, options: Arc<ContextOptions>) -> ContextResult<Self> {
        let mut context = Self::with_options(definition, options)?;
        context.pooled = true;
        Ok(context)
    }

    /// The wrapped definition.
    pub fn definition(&self) -> &C {
        &self.definition
    }

    /// Identifier of this instance and lease.
    pub fn context_id(&self) -> ContextId {
        ContextId {
            instance: self.instance,
            lease: self.lease.load(Ordering::Acquire),
        }
    }

    /// Whether the context came from a pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Whether initialization has run.
    pub fn is_initialized(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Initialized(_))
    }

    /// Whether the context was disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Disposed)
    }

    fn ensure_usable(&self) -> ContextResult<()> {
        if !self.leased.load(Ordering::Acquire) || self.is_disposed() {
            return Err(ContextError::Disposed);
        }
        Ok(())
    }

    /// Services of the context, initializing it on first use.
    pub fn services(&self) -> ContextResult<Arc<ContextServices>> {
        if !self.leased.load(Ordering::Acquire) {
            return Err(ContextError::Disposed);
        }
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Disposed => return Err(ContextError::Disposed),
            Lifecycle::Initialized(services) => return Ok(services.clone()),
            Lifecycle::Uninitialized => {}
        }
        let services = Arc::new(self.initialize()?);
        *lifecycle = Lifecycle::Initialized(services.clone());
        Ok(services)
    }

    /// Options after `on_configuring`.
    pub fn options(&self) -> ContextResult<Arc<ContextOptions>> {
        Ok(self.services()?.options.clone())
    }

    fn initialize(&self) -> ContextResult<ContextServices> {
        let base = self.options.as_deref().cloned().unwrap_or_default();
        let builder = self
            .definition
            .on_configuring(ContextOptionsBuilder::from_options(&base));
        if self.pooled && builder.changes() > 0 {
            return Err(ContextError::PoolingOptionsModified);
        }
        let options = Arc::new(builder.build());

        let (provider, built) = self.acquire_provider(&options)?;
        let scope = provider.create_scope()?;
        match self.bind(&scope, options, built) {
            Ok(services) => Ok(services),
            Err(err) => {
                scope.dispose();
                Err(err)
            }
        }
    }

    /// Root (or external) provider for `options`, and whether it was built
    /// for this call.
    fn acquire_provider(&self, options: &ContextOptions) -> ContextResult<(ServiceProvider, bool)> {
        if let Some(external) = options.internal_service_provider() {
            validate_external(options, external)?;
            return Ok((external.clone(), false));
        }

        let effective = EffectiveServices::resolve(options)?;
        if !options.service_provider_caching() {
            return Ok((build_internal_provider(options, &effective)?, true));
        }

        let fingerprint = OptionsFingerprint::new(options, &effective);
        let mut built = false;
        let provider = options.service_provider_cache().get_or_add(fingerprint, || {
            built = true;
            build_internal_provider(options, &effective)
        })?;
        Ok((provider, built))
    }

    fn bind(
        &self,
        scope: &ServiceProvider,
        options: Arc<ContextOptions>,
        built: bool,
    ) -> ContextResult<ContextServices> {
        let name = short_type_name(type_name::<C>());
        scope
            .get_required::<CurrentContext>()?
            .bind(options.clone(), type_name::<C>());
        scope.get_required::<SingletonOptions>()?.ensure(&options)?;

        let diagnostics = scope.get_required::<DiagnosticsLogger>()?;
        let state_manager = scope.get_required::<StateManager>()?;

        if built {
            diagnostics.log(CoreEventId::ServiceProviderCreated, || {
                format!(
                    "Created internal service provider {} for '{}'",
                    scope.root_id(),
                    name
                )
            })?;
        }
        if options.sensitive_data_logging() {
            diagnostics.log(CoreEventId::SensitiveDataLoggingEnabled, || {
                "Sensitive data logging is enabled. Log entries and error messages may include \
                 key values; only enable it during development"
                    .to_string()
            })?;
        }

        let id = self.context_id();
        for interceptor in scope.get_all::<dyn SingletonInterceptor>()? {
            interceptor.context_initialized(id);
        }
        diagnostics.log(CoreEventId::ContextInitialized, || {
            format!(
                "'{}' initialized using store '{}'",
                name,
                options.store().map_or("none", |store| store.name())
            )
        })?;
        debug!("Context {} ({}) initialized on scope {:?}", name, id, scope.scope_id());

        Ok(ContextServices {
            scope: scope.clone(),
            options,
            state_manager,
            diagnostics,
        })
    }

    /// Resolve `T` from the context's scope, falling back to the
    /// application provider.
    pub fn get_service<T: ?Sized + Send + Sync + 'static>(&self) -> ContextResult<Arc<T>> {
        let services = self.services()?;
        if let Some(service) = services.scope.get::<T>()? {
            return Ok(service);
        }
        let application = services
            .options
            .application_service_provider()
            .and_then(|weak| weak.upgrade());
        if let Some(application) = application
            && let Some(service) = application.get::<T>()?
        {
            return Ok(service);
        }
        if !services.options.is_configured() {
            return Err(ContextError::NoProviderConfiguredFailedToResolveService {
                service: type_name::<T>(),
            });
        }
        Err(DiError::NotFound(type_name::<T>()).into())
    }

    /// The context's model.
    ///
    /// Fails with [`ContextError::NoProviderConfigured`] when neither a store
    /// nor a prebuilt model is configured.
    pub fn model(&self) -> ContextResult<Arc<Model>> {
        let services = self.services()?;
        self.bound_model(&services)
    }

    fn bound_model(&self, services: &ContextServices) -> ContextResult<Arc<Model>> {
        if let Ok(model) = services.state_manager.model() {
            return Ok(model.clone());
        }
        let model = match services.options.model() {
            Some(model) => model.clone(),
            None if services.options.is_configured() => services
                .scope
                .get_required::<ModelSource>()?
                .get_model(TypeId::of::<C>(), type_name::<C>(), |builder| {
                    self.definition.on_model_creating(builder)
                }),
            None => return Err(ContextError::NoProviderConfigured),
        };
        services.state_manager.bind_model(model.clone());
        Ok(model)
    }

    /// The change tracker, with the model bound.
    pub fn state_manager(&self) -> ContextResult<Arc<StateManager>> {
        let services = self.services()?;
        self.bound_model(&services)?;
        Ok(services.state_manager.clone())
    }

    fn track(&self, entity: &EntityRef, op: GraphOperation) -> ContextResult<EntityEntry> {
        let manager = self.state_manager()?;
        let internal = manager.track_graph(entity, op)?;
        Ok(EntityEntry::new(internal, manager))
    }

    fn track_range<I>(&self, entities: I, op: GraphOperation) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.ensure_usable()?;
        for entity in entities {
            self.track(entity.borrow(), op)?;
        }
        Ok(())
    }

    /// Track `entity` and its untracked graph as `Added`.
    pub fn add(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        self.track(entity, GraphOperation::Add)
    }

    /// Track `entity` and its untracked graph as `Unchanged`, or `Added`
    /// where the key is unset.
    pub fn attach(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        self.track(entity, GraphOperation::Attach)
    }

    /// Track `entity` and its untracked graph as `Modified`, or `Added`
    /// where the key is unset.
    pub fn update(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        self.track(entity, GraphOperation::Update)
    }

    /// Mark `entity` for deletion, cascading to its dependents. An `Added`
    /// entity is detached instead.
    pub fn remove(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        self.track(entity, GraphOperation::Remove)
    }

    /// [`add`](Self::add) each entity. Empty input does nothing.
    pub fn add_range<I>(&self, entities: I) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.track_range(entities, GraphOperation::Add)
    }

    /// [`attach`](Self::attach) each entity.
    pub fn attach_range<I>(&self, entities: I) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.track_range(entities, GraphOperation::Attach)
    }

    /// [`update`](Self::update) each entity.
    pub fn update_range<I>(&self, entities: I) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.track_range(entities, GraphOperation::Update)
    }

    /// [`remove`](Self::remove) each entity.
    pub fn remove_range<I>(&self, entities: I) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.track_range(entities, GraphOperation::Remove)
    }

    /// [`add`](Self::add), generating keys asynchronously.
    pub async fn add_async(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        let manager = self.state_manager()?;
        let internal = manager.track_graph_async(entity, GraphOperation::Add).await?;
        Ok(EntityEntry::new(internal, manager))
    }

    /// [`add_range`](Self::add_range), generating keys asynchronously.
    pub async fn add_range_async<I>(&self, entities: I) -> ContextResult<()>
    where
        I: IntoIterator,
        I::Item: Borrow<EntityRef>,
    {
        self.ensure_usable()?;
        for entity in entities {
            self.add_async(entity.borrow()).await?;
        }
        Ok(())
    }

    /// Entry for `entity`, `Detached` when it is not tracked.
    pub fn entry(&self, entity: &EntityRef) -> ContextResult<EntityEntry> {
        let manager = self.state_manager()?;
        let internal = manager.get_or_create_entry(entity)?;
        Ok(EntityEntry::new(internal, manager))
    }

    /// Every tracked entry, in the order entities were first seen.
    pub fn entries(&self) -> ContextResult<Vec<EntityEntry>> {
        let manager = self.state_manager()?;
        Ok(manager
            .entries()
            .into_iter()
            .map(|internal| EntityEntry::new(internal, manager.clone()))
            .collect())
    }

    /// Send pending changes to the store and accept them.
    pub fn save_changes(&self) -> ContextResult<usize> {
        let (services, pending) = self.prepare_save()?;
        let saved = database(&services)?.save_changes(&pending)?;
        self.complete_save(&services, saved)
    }

    /// [`save_changes`](Self::save_changes) through the store's asynchronous path.
    pub async fn save_changes_async(&self) -> ContextResult<usize> {
        let (services, pending) = self.prepare_save()?;
        let saved = database(&services)?.save_changes_async(&pending).await?;
        self.complete_save(&services, saved)
    }

    fn prepare_save(&self) -> ContextResult<(Arc<ContextServices>, Vec<PendingChange>)> {
        let services = self.services()?;
        self.bound_model(&services)?;
        let pending = services.state_manager.pending_changes()?;
        let id = self.context_id();
        for interceptor in services.options.interceptors() {
            interceptor.saving_changes(id, pending.len())?;
        }
        Ok((services, pending))
    }

    fn complete_save(&self, services: &ContextServices, saved: usize) -> ContextResult<usize> {
        services.state_manager.accept_all_changes()?;
        services
            .diagnostics
            .log(CoreEventId::SaveChangesCompleted, || {
                format!("Saved {} entities", saved)
            })?;
        let id = self.context_id();
        for interceptor in services.options.interceptors() {
            interceptor.saved_changes(id, saved);
        }
        Ok(saved)
    }

    /// Dispose the context's scope. Later use fails with
    /// [`ContextError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Disposed);
        if let Lifecycle::Initialized(services) = previous {
            let id = self.context_id();
            if let Err(err) = services.diagnostics.log(CoreEventId::ContextDisposed, || {
                format!("Context {} disposed", id)
            }) {
                warn!("Disposing context {}: {}", id, err);
            }
            services.scope.dispose();
        }
    }

    /// Start a new lease on a pooled instance.
    pub(crate) fn renew_lease(&self) {
        self.lease.fetch_add(1, Ordering::AcqRel);
        self.leased.store(true, Ordering::Release);
    }

    /// End the current lease, clearing tracked entities. Returns `false`
    /// when the context cannot be reused.
    pub(crate) fn end_lease(&self) -> bool {
        self.leased.store(false, Ordering::Release);
        match &*self.lifecycle.lock() {
            Lifecycle::Initialized(services) => {
                services.state_manager.clear();
                true
            }
            Lifecycle::Uninitialized => true,
            Lifecycle::Disposed => false,
        }
    }
}

fn database(services: &ContextServices) -> ContextResult<Arc<dyn Database>> {
    services
        .scope
        .get::<dyn Database>()?
        .ok_or(ContextError::NoProviderConfigured)
}

/// Checks that options are usable with an externally owned provider.
fn validate_external(options: &ContextOptions, external: &ServiceProvider) -> ContextResult<()> {
    if !options.replacements().is_empty() {
        return Err(ContextError::InvalidReplaceService);
    }
    if options.logger_factory().is_some() {
        return Err(ContextError::InvalidUseService {
            option: "use_logger_factory",
            service: "LoggerFactory",
        });
    }
    if options.memory_cache().is_some() {
        return Err(ContextError::InvalidUseService {
            option: "use_memory_cache",
            service: "MemoryCache",
        });
    }
    if !options.singleton_interceptors().is_empty() {
        return Err(ContextError::InvalidUseService {
            option: "add_singleton_interceptor",
            service: "SingletonInterceptor",
        });
    }
    if !external.contains::<CoreServices>() {
        return Err(ContextError::NoCoreServices);
    }
    Ok(())
}

impl<C: ContextDefinition> Deref for DbContext<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.definition
    }
}

impl<C: ContextDefinition> Drop for DbContext<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: ContextDefinition> fmt::Debug for DbContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.lifecycle.lock() {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initialized(_) => "initialized",
            Lifecycle::Disposed => "disposed",
        };
        f.debug_struct("DbContext")
            .field("type", &short_type_name(type_name::<C>()))
            .field("id", &self.context_id())
            .field("state", &state)
            .field("pooled", &self.pooled)
            .finish()
    }
}
