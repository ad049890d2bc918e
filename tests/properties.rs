//! Integration tests for the container, lifecycle and tracking guarantees.
//!
//! Each section pins down one property callers rely on.

use keel::prelude::*;
use keel::{ContextFactory, EntityEntry, InMemoryServicesExt, ProviderOptions, ValueGenerator};
use std::sync::Arc;
use std::thread;

// =============================================================================
// Fixtures
// =============================================================================

struct Catalog;

impl ContextDefinition for Catalog {
    fn on_model_creating(&self, model: &mut ModelBuilder) {
        model.entity("Category").generated_key("Id");
        model
            .entity("Product")
            .generated_key("Id")
            .has_foreign_key("CategoryId", "Category")
            .with_reference("Category")
            .with_collection("Products");
    }

    fn constructors() -> Vec<ContextConstructor<Self>> {
        vec![ContextConstructor::parameterless(|| Catalog).with_options()]
    }
}

fn in_memory(name: &str) -> ContextOptionsBuilder {
    ContextOptionsBuilder::for_context::<Catalog>().use_in_memory_database(name)
}

fn catalog(name: &str) -> DbContext<Catalog> {
    DbContext::with_options(Catalog, Arc::new(in_memory(name).build())).unwrap()
}

fn validated(services: &ServiceCollection) -> ServiceProvider {
    services.build_provider_with(ProviderOptions::new().validate_scopes(true))
}

struct Clock;
struct Session;

// =============================================================================
// Singleton identity
// =============================================================================

#[test]
fn test_singleton_identity_across_threads() {
    let mut services = ServiceCollection::new();
    services.add_singleton::<Clock, _>(|_| Ok(Arc::new(Clock)));
    let root = validated(&services);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = root.clone();
            thread::spawn(move || root.get_required::<Clock>().unwrap())
        })
        .collect();
    let clocks: Vec<Arc<Clock>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let scope = root.create_scope().unwrap();
    let from_scope = scope.get_required::<Clock>().unwrap();
    assert!(clocks.iter().all(|c| Arc::ptr_eq(c, &from_scope)));
}

// =============================================================================
// Scope isolation
// =============================================================================

#[test]
fn test_scope_isolation() {
    let mut services = ServiceCollection::new();
    services.add_scoped::<Session, _>(|_| Ok(Arc::new(Session)));
    let root = validated(&services);

    let first = root.create_scope().unwrap();
    let second = root.create_scope().unwrap();

    let a = first.get_required::<Session>().unwrap();
    assert!(Arc::ptr_eq(&a, &first.get_required::<Session>().unwrap()));
    assert!(!Arc::ptr_eq(&a, &second.get_required::<Session>().unwrap()));
}

// =============================================================================
// Disposal
// =============================================================================

#[test]
fn test_disposal_is_terminal() {
    let context = catalog("disposal");
    context.model().unwrap();

    context.dispose();
    context.dispose();

    assert!(matches!(context.model(), Err(ContextError::Disposed)));
    assert!(matches!(context.get_service::<Clock>(), Err(ContextError::Disposed)));
    assert!(matches!(context.state_manager(), Err(ContextError::Disposed)));
    assert!(matches!(context.save_changes(), Err(ContextError::Disposed)));
}

#[test]
fn test_disposal_before_initialization() {
    let context = catalog("never-used");
    context.dispose();

    assert!(!context.is_initialized());
    assert!(matches!(context.model(), Err(ContextError::Disposed)));
}

// =============================================================================
// Entry identity
// =============================================================================

#[test]
fn test_entry_identity() {
    let context = catalog("identity");
    let product = EntityObject::new("Product").with("Id", 3).into_ref();

    let entries: Vec<EntityEntry> = vec![
        context.attach(&product).unwrap(),
        context.update(&product).unwrap(),
        context.add(&product).unwrap(),
        context.remove(&product).unwrap(),
        context.entry(&product).unwrap(),
    ];
    entries[0].set_state(EntityState::Modified).unwrap();
    let after_explicit = context.entry(&product).unwrap();

    for entry in &entries {
        assert!(Arc::ptr_eq(entry.internal(), after_explicit.internal()));
    }
}

// =============================================================================
// State transitions
// =============================================================================

#[test]
fn test_sentinel_keys_turn_attach_and_update_into_add() {
    let context = catalog("sentinel");
    let attached = EntityObject::new("Category").into_ref();
    let updated = EntityObject::new("Category").with("Id", 0).into_ref();
    let keyed = EntityObject::new("Category").with("Id", 9).into_ref();

    assert_eq!(context.attach(&attached).unwrap().state(), EntityState::Added);
    assert_eq!(context.update(&updated).unwrap().state(), EntityState::Added);
    assert_eq!(context.update(&keyed).unwrap().state(), EntityState::Modified);
    assert_eq!(context.remove(&attached).unwrap().state(), EntityState::Detached);
    assert_eq!(context.remove(&keyed).unwrap().state(), EntityState::Deleted);
}

// =============================================================================
// Fix-up symmetry
// =============================================================================

fn stale_pair() -> (EntityRef, EntityRef) {
    let principal = EntityObject::new("Category").with("Id", 1).into_ref();
    let dependent = EntityObject::new("Product")
        .with("Id", 1)
        .with("CategoryId", 7)
        .into_ref();
    dependent.set_reference("Category", Some(&principal));
    (principal, dependent)
}

fn assert_converged(context: &DbContext<Catalog>, principal: &EntityRef, dependent: &EntityRef) {
    assert_eq!(dependent.get("CategoryId"), Value::Int(1));
    let products = principal.collection("Products");
    assert_eq!(products.len(), 1);
    assert!(Arc::ptr_eq(&products[0], dependent));
    assert_eq!(context.entry(principal).unwrap().state(), EntityState::Unchanged);
    assert_eq!(context.entry(dependent).unwrap().state(), EntityState::Unchanged);
}

#[test]
fn test_fixup_principal_first() {
    let context = catalog("fixup-principal");
    let (principal, dependent) = stale_pair();

    context.attach(&principal).unwrap();
    context.attach(&dependent).unwrap();

    assert_converged(&context, &principal, &dependent);
}

#[test]
fn test_fixup_dependent_first() {
    let context = catalog("fixup-dependent");
    let (principal, dependent) = stale_pair();

    context.attach(&dependent).unwrap();
    context.attach(&principal).unwrap();

    assert_converged(&context, &principal, &dependent);
}

// =============================================================================
// Lifetime matrix
// =============================================================================

const LIFETIMES: [Lifetime; 3] = [Lifetime::Singleton, Lifetime::Scoped, Lifetime::Transient];

fn configure(_app: &ServiceProvider, options: ContextOptionsBuilder) -> ContextOptionsBuilder {
    options.use_in_memory_database("matrix")
}

fn captive(outer: Lifetime, options: Lifetime) -> bool {
    outer == Lifetime::Singleton && options == Lifetime::Scoped
}

#[test]
fn test_context_lifetime_matrix() {
    for context_lifetime in LIFETIMES {
        for options_lifetime in LIFETIMES {
            let mut services = ServiceCollection::new();
            services
                .add_db_context_with::<Catalog, _>(configure, context_lifetime, options_lifetime)
                .unwrap();
            let root = validated(&services);
            let first = root.create_scope().unwrap();
            let second = root.create_scope().unwrap();

            let resolved = first.get_required::<DbContext<Catalog>>();
            if captive(context_lifetime, options_lifetime) {
                let err = ContextError::from(resolved.err().unwrap());
                assert!(err.is_scope_validation(), "{context_lifetime}/{options_lifetime}");
                continue;
            }

            let a = resolved.unwrap();
            let again = first.get_required::<DbContext<Catalog>>().unwrap();
            let other = second.get_required::<DbContext<Catalog>>().unwrap();
            match context_lifetime {
                Lifetime::Singleton => {
                    assert!(Arc::ptr_eq(&a, &again) && Arc::ptr_eq(&a, &other));
                }
                Lifetime::Scoped => {
                    assert!(Arc::ptr_eq(&a, &again) && !Arc::ptr_eq(&a, &other));
                }
                Lifetime::Transient => {
                    assert!(!Arc::ptr_eq(&a, &again));
                }
            }
            assert!(a.model().is_ok(), "{context_lifetime}/{options_lifetime}");
        }
    }
}

#[test]
fn test_factory_lifetime_matrix() {
    for factory_lifetime in LIFETIMES {
        for options_lifetime in LIFETIMES {
            let mut services = ServiceCollection::new();
            services
                .add_db_context_factory::<Catalog, _>(configure, factory_lifetime, options_lifetime)
                .unwrap();
            let root = validated(&services);
            let scope = root.create_scope().unwrap();

            let resolved = scope.get_required::<ContextFactory<Catalog>>();
            if captive(factory_lifetime, options_lifetime) {
                assert!(resolved.err().unwrap().is_scope_validation());
                continue;
            }
            let context = resolved.unwrap().create_context().unwrap();
            assert!(context.model().is_ok(), "{factory_lifetime}/{options_lifetime}");
        }
    }
}

// =============================================================================
// Replace-service exclusivity
// =============================================================================

struct Fixed;

impl ValueGenerator for Fixed {
    fn next(&self, _entity_type: &str, _property: &str) -> ContextResult<Value> {
        Ok(Value::Int(1))
    }
}

fn external_provider() -> ServiceProvider {
    let mut services = ServiceCollection::new();
    services.add_keel_in_memory_database().add_keel_core();
    services.build_provider()
}

fn replace_with_external(
    provider: ServiceProvider,
) -> impl Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static {
    move |_, options| {
        options
            .use_in_memory_database("exclusive")
            .use_internal_service_provider(provider.clone())
            .replace_service::<dyn ValueGenerator, Fixed, _>(|_| {
                Ok(Arc::new(Fixed) as Arc<dyn ValueGenerator>)
            })
    }
}

#[test]
fn test_replace_service_with_external_provider_direct() {
    let configure = replace_with_external(external_provider());
    let options = configure(&external_provider(), ContextOptionsBuilder::for_context::<Catalog>());
    let context = DbContext::with_options(Catalog, Arc::new(options.build())).unwrap();

    assert!(matches!(context.model(), Err(ContextError::InvalidReplaceService)));
}

#[test]
fn test_replace_service_with_external_provider_factory() {
    let mut services = ServiceCollection::new();
    services
        .add_db_context_factory::<Catalog, _>(
            replace_with_external(external_provider()),
            Lifetime::Singleton,
            Lifetime::Singleton,
        )
        .unwrap();
    let root = validated(&services);

    let context = root
        .get_required::<ContextFactory<Catalog>>()
        .unwrap()
        .create_context()
        .unwrap();
    assert!(matches!(context.model(), Err(ContextError::InvalidReplaceService)));
}

#[test]
fn test_replace_service_with_external_provider_registration() {
    let mut services = ServiceCollection::new();
    services
        .add_db_context_with::<Catalog, _>(
            replace_with_external(external_provider()),
            Lifetime::Scoped,
            Lifetime::Scoped,
        )
        .unwrap();
    let root = validated(&services);
    let scope = root.create_scope().unwrap();

    let context = scope.get_required::<DbContext<Catalog>>().unwrap();
    assert!(matches!(context.model(), Err(ContextError::InvalidReplaceService)));
    assert!(matches!(context.save_changes(), Err(ContextError::InvalidReplaceService)));
}

struct SelfReplacing;

impl ContextDefinition for SelfReplacing {
    fn on_configuring(&self, options: ContextOptionsBuilder) -> ContextOptionsBuilder {
        replace_with_external(external_provider())(&external_provider(), options)
    }
}

#[test]
fn test_replace_service_with_external_provider_on_configuring() {
    let context = DbContext::new(SelfReplacing);
    assert!(matches!(context.model(), Err(ContextError::InvalidReplaceService)));
}

#[test]
fn test_replace_service_with_internal_provider_is_allowed() {
    let options = in_memory("replaced").replace_service::<dyn ValueGenerator, Fixed, _>(|_| {
        Ok(Arc::new(Fixed) as Arc<dyn ValueGenerator>)
    });
    let context = DbContext::with_options(Catalog, Arc::new(options.build())).unwrap();
    let category = EntityObject::new("Category").into_ref();

    context.add(&category).unwrap();
    assert_eq!(category.get("Id"), Value::Int(1));
    assert!(context.model().is_ok());
}
