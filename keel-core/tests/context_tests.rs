// Tests for context initialization, internal providers and saving

use async_trait::async_trait;
use keel_core::{
    ContextDefinition, ContextError, ContextId, ContextOptions, ContextOptionsBuilder,
    CoreEventId, CoreServicesExt, Database, DbContext, EntityObject, EntityState, ModelBuilder,
    PendingChange, SaveChangesInterceptor, ServiceProviderCache, SingletonInterceptor,
    StoreProvider, Value, ValueGenerator,
};
use keel_core::{ContextResult, SequentialValueGenerator};
use keel_di::{ServiceCollection, ServiceDescriptor, ServiceProvider};
use keel_log::{ListLoggerFactory, LoggerFactory};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Test store
// ============================================================================

/// Changes every recording database saved, shared per internal provider.
#[derive(Default)]
struct Journal {
    saved: Mutex<Vec<(String, EntityState)>>,
}

impl Journal {
    fn saved(&self) -> Vec<(String, EntityState)> {
        self.saved.lock().clone()
    }
}

struct RecordingDatabase {
    journal: Arc<Journal>,
}

#[async_trait]
impl Database for RecordingDatabase {
    fn save_changes(&self, changes: &[PendingChange]) -> ContextResult<usize> {
        let mut saved = self.journal.saved.lock();
        for change in changes {
            saved.push((change.entity_type.clone(), change.state));
        }
        Ok(changes.len())
    }
}

#[derive(Debug, Default)]
struct RecordingStore;

impl StoreProvider for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn register_services(&self, services: &mut ServiceCollection) {
        services.try_add(ServiceDescriptor::singleton::<Journal, _>(|_| {
            Ok(Arc::new(Journal::default()))
        }));
        services.try_add(ServiceDescriptor::scoped::<dyn Database, _>(|r| {
            let database = RecordingDatabase {
                journal: r.get_required::<Journal>()?,
            };
            Ok(Arc::new(database) as Arc<dyn Database>)
        }));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Contexts
// ============================================================================

/// Context that configures itself.
struct Shop {
    cache: Arc<ServiceProviderCache>,
}

impl ContextDefinition for Shop {
    fn on_configuring(&self, options: ContextOptionsBuilder) -> ContextOptionsBuilder {
        if options.is_configured() {
            return options;
        }
        options
            .use_store(Arc::new(RecordingStore))
            .use_service_provider_cache(self.cache.clone())
    }

    fn on_model_creating(&self, model: &mut ModelBuilder) {
        model.entity("Category").generated_key("Id");
    }
}

/// Context with nothing configured.
struct Bare;

impl ContextDefinition for Bare {
    fn on_model_creating(&self, model: &mut ModelBuilder) {
        model.entity("Category").generated_key("Id");
    }
}

fn shop(cache: &Arc<ServiceProviderCache>) -> DbContext<Shop> {
    DbContext::new(Shop {
        cache: cache.clone(),
    })
}

fn shop_with(cache: &Arc<ServiceProviderCache>, options: ContextOptionsBuilder) -> DbContext<Shop> {
    let options = options
        .use_store(Arc::new(RecordingStore))
        .use_service_provider_cache(cache.clone())
        .build();
    DbContext::with_options(
        Shop {
            cache: cache.clone(),
        },
        Arc::new(options),
    )
    .unwrap()
}

fn builder() -> ContextOptionsBuilder {
    ContextOptionsBuilder::for_context::<Shop>()
}

fn new_category() -> keel_core::EntityRef {
    EntityObject::new("Category").into_ref()
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_initialization_is_lazy() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop(&cache);

    assert!(!context.is_initialized());
    assert!(cache.is_empty());

    context.model().unwrap();
    assert!(context.is_initialized());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_model_built_from_on_model_creating() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop(&cache);

    let model = context.model().unwrap();
    assert_eq!(model.len(), 1);
    assert!(Arc::ptr_eq(&model, &context.model().unwrap()));
}

#[test]
fn test_unconfigured_context() {
    let context = DbContext::new(Bare);

    assert!(matches!(context.model(), Err(ContextError::NoProviderConfigured)));
    assert!(matches!(
        context.save_changes(),
        Err(ContextError::NoProviderConfigured)
    ));
    assert!(matches!(
        context.get_service::<Journal>(),
        Err(ContextError::NoProviderConfiguredFailedToResolveService { .. })
    ));
}

#[test]
fn test_configured_context_missing_service() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop(&cache);

    let err = context.get_service::<String>().unwrap_err();
    assert!(matches!(err, ContextError::Di(keel_di::DiError::NotFound(_))));
}

#[test]
fn test_contexts_share_cached_provider() {
    let cache = Arc::new(ServiceProviderCache::new());
    let first = shop(&cache);
    let second = shop(&cache);

    let a = first.services().unwrap();
    let b = second.services().unwrap();

    assert!(a.scope().same_root(b.scope()));
    assert_ne!(a.scope().scope_id(), b.scope().scope_id());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_different_configuration_gets_own_provider() {
    let cache = Arc::new(ServiceProviderCache::new());
    let plain = shop(&cache);
    let sensitive = shop_with(&cache, builder().enable_sensitive_data_logging(true));

    let a = plain.services().unwrap();
    let b = sensitive.services().unwrap();

    assert!(!a.scope().same_root(b.scope()));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_save_interceptors_do_not_split_cache() {
    let cache = Arc::new(ServiceProviderCache::new());
    let plain = shop(&cache);
    let intercepted = shop_with(&cache, builder().add_interceptor(Arc::new(CountingInterceptor::default())));

    assert!(plain
        .services()
        .unwrap()
        .scope()
        .same_root(intercepted.services().unwrap().scope()));
}

#[test]
fn test_caching_disabled_builds_each_time() {
    let cache = Arc::new(ServiceProviderCache::new());
    let first = shop_with(&cache, builder().enable_service_provider_caching(false));
    let second = shop_with(&cache, builder().enable_service_provider_caching(false));

    assert!(!first
        .services()
        .unwrap()
        .scope()
        .same_root(second.services().unwrap().scope()));
    assert!(cache.is_empty());
}

#[test]
fn test_dispose_releases_scope() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop(&cache);
    let services = context.services().unwrap();

    context.dispose();
    context.dispose();

    assert!(context.is_disposed());
    assert!(services.scope().is_disposed());
    assert!(!services.scope().root().is_disposed());
    assert!(matches!(context.model(), Err(ContextError::Disposed)));
}

#[test]
fn test_dropping_context_disposes_scope() {
    let cache = Arc::new(ServiceProviderCache::new());
    let services = shop(&cache).services().unwrap();

    assert!(services.scope().is_disposed());
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_events_reach_logger_factory() {
    let cache = Arc::new(ServiceProviderCache::new());
    let logs = ListLoggerFactory::new();
    let context = shop_with(
        &cache,
        builder().use_logger_factory(Arc::new(logs.clone()) as Arc<dyn LoggerFactory>),
    );

    context.attach(&new_category()).unwrap();

    assert!(logs.contains("Created internal service provider"));
    assert!(logs.contains("'Shop' initialized using store 'recording'"));
    assert!(!logs.entries_for("keel.change_tracking").is_empty());
}

#[test]
fn test_sensitive_data_logging_warns() {
    let cache = Arc::new(ServiceProviderCache::new());
    let logs = ListLoggerFactory::new();
    let context = shop_with(
        &cache,
        builder()
            .use_logger_factory(Arc::new(logs.clone()) as Arc<dyn LoggerFactory>)
            .enable_sensitive_data_logging(true),
    );
    let category = EntityObject::new("Category").with("Id", 12).into_ref();

    context.attach(&category).unwrap();

    assert!(logs.contains("Sensitive data logging is enabled"));
    assert!(logs.contains("with key '12'"));
}

#[test]
fn test_warning_configured_to_throw() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(
        &cache,
        builder()
            .enable_sensitive_data_logging(true)
            .configure_warnings(|w| w.throw(CoreEventId::SensitiveDataLoggingEnabled)),
    );

    let err = context.model().unwrap_err();
    assert!(matches!(
        err,
        ContextError::WarningAsError { event: "SensitiveDataLoggingEnabled", .. }
    ));
}

#[test]
fn test_ignored_events_are_dropped() {
    let cache = Arc::new(ServiceProviderCache::new());
    let logs = ListLoggerFactory::new();
    let context = shop_with(
        &cache,
        builder()
            .use_logger_factory(Arc::new(logs.clone()) as Arc<dyn LoggerFactory>)
            .configure_warnings(|w| w.ignore(CoreEventId::ContextInitialized)),
    );

    context.model().unwrap();
    assert!(!logs.contains("initialized using store"));
}

// ============================================================================
// Service replacement
// ============================================================================

struct FixedGenerator;

impl ValueGenerator for FixedGenerator {
    fn next(&self, _entity_type: &str, _property: &str) -> ContextResult<Value> {
        Ok(Value::Int(100))
    }
}

#[test]
fn test_replace_service() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(
        &cache,
        builder().replace_service::<dyn ValueGenerator, FixedGenerator, _>(|_| {
            Ok(Arc::new(FixedGenerator) as Arc<dyn ValueGenerator>)
        }),
    );
    let category = new_category();

    context.add(&category).unwrap();
    assert_eq!(category.get("Id"), Value::Int(100));
}

#[test]
fn test_replace_service_implementation() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(
        &cache,
        builder().replace_service_implementation::<
            dyn ValueGenerator,
            SequentialValueGenerator,
            FixedGenerator,
            _,
        >(|_| Ok(Arc::new(FixedGenerator) as Arc<dyn ValueGenerator>)),
    );
    let category = new_category();

    context.add(&category).unwrap();
    assert_eq!(category.get("Id"), Value::Int(100));
}

// ============================================================================
// External internal provider
// ============================================================================

fn external_provider() -> ServiceProvider {
    let mut services = ServiceCollection::new();
    RecordingStore.register_services(&mut services);
    services.add_keel_core();
    services.build_provider()
}

fn external_options(provider: &ServiceProvider) -> ContextOptionsBuilder {
    builder()
        .use_store(Arc::new(RecordingStore))
        .use_internal_service_provider(provider.clone())
}

fn bare_with(options: ContextOptionsBuilder) -> DbContext<Shop> {
    DbContext::with_options(
        Shop {
            cache: Arc::new(ServiceProviderCache::new()),
        },
        Arc::new(options.build()),
    )
    .unwrap()
}

#[test]
fn test_external_provider_is_used() {
    let provider = external_provider();
    let context = bare_with(external_options(&provider));

    assert!(context.services().unwrap().scope().same_root(&provider));
}

#[test]
fn test_external_provider_rejects_replace_service() {
    let provider = external_provider();
    let context = bare_with(external_options(&provider).replace_service::<
        dyn ValueGenerator,
        FixedGenerator,
        _,
    >(|_| Ok(Arc::new(FixedGenerator) as Arc<dyn ValueGenerator>)));

    assert!(matches!(context.model(), Err(ContextError::InvalidReplaceService)));
}

#[test]
fn test_external_provider_rejects_service_overrides() {
    let provider = external_provider();

    let context = bare_with(
        external_options(&provider)
            .use_logger_factory(Arc::new(ListLoggerFactory::new()) as Arc<dyn LoggerFactory>),
    );
    assert!(matches!(
        context.model(),
        Err(ContextError::InvalidUseService { option: "use_logger_factory", .. })
    ));

    let context = bare_with(
        external_options(&provider).use_memory_cache(Arc::new(keel_core::MemoryCache::default())),
    );
    assert!(matches!(
        context.model(),
        Err(ContextError::InvalidUseService { option: "use_memory_cache", .. })
    ));

    let context = bare_with(
        external_options(&provider).add_singleton_interceptor(Arc::new(InitCounter::default())),
    );
    assert!(matches!(
        context.model(),
        Err(ContextError::InvalidUseService { option: "add_singleton_interceptor", .. })
    ));
}

#[test]
fn test_external_provider_without_core_services() {
    let mut services = ServiceCollection::new();
    RecordingStore.register_services(&mut services);
    let provider = services.build_provider();

    let context = bare_with(external_options(&provider));
    assert!(matches!(context.model(), Err(ContextError::NoCoreServices)));
}

#[test]
fn test_singleton_options_must_match_on_shared_provider() {
    let provider = external_provider();
    let first = bare_with(external_options(&provider));
    first.model().unwrap();

    let second = bare_with(external_options(&provider).enable_sensitive_data_logging(true));
    assert!(matches!(
        second.model(),
        Err(ContextError::SingletonOptionChanged { option: "enable_sensitive_data_logging" })
    ));

    let third = bare_with(
        external_options(&provider).configure_warnings(|w| w.ignore(CoreEventId::ContextDisposed)),
    );
    assert!(matches!(
        third.model(),
        Err(ContextError::SingletonOptionChanged { option: "configure_warnings" })
    ));
}

// ============================================================================
// Application provider
// ============================================================================

struct Clock(&'static str);

#[test]
fn test_get_service_falls_back_to_application_provider() {
    let mut services = ServiceCollection::new();
    services.add_instance(Arc::new(Clock("utc")));
    let app = services.build_provider();

    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(&cache, builder().use_application_service_provider(&app));

    assert_eq!(context.get_service::<Clock>().unwrap().0, "utc");
    assert!(context.get_service::<Journal>().is_ok());
}

#[test]
fn test_logger_factory_adopted_from_application_provider() {
    let logs = ListLoggerFactory::new();
    let mut services = ServiceCollection::new();
    services.add_instance::<dyn LoggerFactory>(Arc::new(logs.clone()));
    let app = services.build_provider();

    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(&cache, builder().use_application_service_provider(&app));
    context.model().unwrap();

    assert!(logs.contains("initialized using store 'recording'"));
}

// ============================================================================
// Saving
// ============================================================================

#[derive(Default)]
struct CountingInterceptor {
    saving: AtomicUsize,
    saved: AtomicUsize,
    contexts: Mutex<Vec<ContextId>>,
}

impl SaveChangesInterceptor for CountingInterceptor {
    fn saving_changes(&self, context: ContextId, pending: usize) -> ContextResult<()> {
        self.saving.fetch_add(pending, Ordering::SeqCst);
        self.contexts.lock().push(context);
        Ok(())
    }

    fn saved_changes(&self, _context: ContextId, saved: usize) {
        self.saved.fetch_add(saved, Ordering::SeqCst);
    }
}

struct Blocker;

impl SaveChangesInterceptor for Blocker {
    fn saving_changes(&self, _context: ContextId, _pending: usize) -> ContextResult<()> {
        Err(ContextError::store("saving is blocked"))
    }
}

#[derive(Default)]
struct InitCounter {
    count: AtomicUsize,
}

impl SingletonInterceptor for InitCounter {
    fn context_initialized(&self, _context: ContextId) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_save_changes_accepts_changes() {
    let cache = Arc::new(ServiceProviderCache::new());
    let interceptor = Arc::new(CountingInterceptor::default());
    let context = shop_with(&cache, builder().add_interceptor(interceptor.clone()));
    let added = new_category();
    let removed = EntityObject::new("Category").with("Id", 50).into_ref();
    context.add(&added).unwrap();
    context.remove(&removed).unwrap();

    assert_eq!(context.save_changes().unwrap(), 2);

    let journal = context.get_service::<Journal>().unwrap();
    assert_eq!(
        journal.saved(),
        vec![
            ("Category".to_string(), EntityState::Added),
            ("Category".to_string(), EntityState::Deleted),
        ]
    );
    assert_eq!(context.entry(&added).unwrap().state(), EntityState::Unchanged);
    assert_eq!(context.entry(&removed).unwrap().state(), EntityState::Detached);
    assert_eq!(interceptor.saving.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.saved.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.contexts.lock()[0], context.context_id());

    assert_eq!(context.save_changes().unwrap(), 0);
}

#[test]
fn test_interceptor_aborts_save() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop_with(&cache, builder().add_interceptor(Arc::new(Blocker)));
    let category = new_category();
    context.add(&category).unwrap();

    assert!(matches!(context.save_changes(), Err(ContextError::Store(_))));
    assert_eq!(context.entry(&category).unwrap().state(), EntityState::Added);
    assert!(context.get_service::<Journal>().unwrap().saved().is_empty());
}

#[tokio::test]
async fn test_save_changes_async() {
    let cache = Arc::new(ServiceProviderCache::new());
    let context = shop(&cache);
    let category = new_category();
    context.add_async(&category).await.unwrap();

    assert_eq!(context.save_changes_async().await.unwrap(), 1);
    assert_eq!(context.entry(&category).unwrap().state(), EntityState::Unchanged);
}

#[test]
fn test_singleton_interceptor_sees_each_initialization() {
    let cache = Arc::new(ServiceProviderCache::new());
    let counter = Arc::new(InitCounter::default());
    let options = builder().add_singleton_interceptor(counter.clone());

    let first = shop_with(&cache, options.clone());
    let second = shop_with(&cache, options);
    first.model().unwrap();
    second.model().unwrap();

    assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_untyped_options_are_accepted() {
    let cache = Arc::new(ServiceProviderCache::new());
    let options: ContextOptions = ContextOptionsBuilder::new()
        .use_store(Arc::new(RecordingStore))
        .use_service_provider_cache(cache.clone())
        .build();

    let context = DbContext::with_options(
        Shop {
            cache: cache.clone(),
        },
        Arc::new(options),
    )
    .unwrap();
    assert!(context.model().is_ok());
}
