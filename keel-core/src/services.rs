//! Core services registered in every internal provider.

use crate::cache::MemoryCache;
use crate::diagnostics::DiagnosticsLogger;
use crate::error::{ContextError, ContextResult};
use crate::interceptor::SingletonInterceptor;
use crate::metadata::{DefaultModelCustomizer, ModelCustomizer, ModelSource};
use crate::options::{ContextOptions, ServiceReplacement, WarningsConfiguration};
use crate::provider_cache::EffectiveServices;
use crate::tracking::{EntityStateListener, NavigationFixer, StateChangeLogger, StateManager};
use crate::value_generation::{SequentialValueGenerator, ValueGenerator};
use keel_di::{ProviderOptions, ServiceCollection, ServiceDescriptor, ServiceKey, ServiceProvider};
use keel_log::{ConsoleLoggerFactory, LoggerFactory, debug, trace};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Marker registered with the core services.
///
/// A provider supplied through `use_internal_service_provider` must contain
/// it, or initialization fails with [`ContextError::NoCoreServices`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreServices;

/// Options that must be the same for every context sharing a provider.
///
/// The first context to initialize against a provider records them; later
/// contexts configured differently fail with
/// [`ContextError::SingletonOptionChanged`].
#[derive(Debug, Default)]
pub struct SingletonOptions {
    recorded: OnceCell<(bool, WarningsConfiguration)>,
}

impl SingletonOptions {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `options`, or check them against the recorded values.
    pub fn ensure(&self, options: &ContextOptions) -> ContextResult<()> {
        let (sensitive, warnings) = self.recorded.get_or_init(|| {
            (
                options.sensitive_data_logging(),
                options.warnings().clone(),
            )
        });
        if *sensitive != options.sensitive_data_logging() {
            return Err(ContextError::SingletonOptionChanged {
                option: "enable_sensitive_data_logging",
            });
        }
        if warnings != options.warnings() {
            return Err(ContextError::SingletonOptionChanged {
                option: "configure_warnings",
            });
        }
        Ok(())
    }
}

/// The context a scope was created for.
///
/// Scoped services that depend on the context's configuration read it from
/// here. Bound once, right after the scope is created.
#[derive(Debug, Default)]
pub struct CurrentContext {
    binding: OnceCell<(Arc<ContextOptions>, &'static str)>,
}

impl CurrentContext {
    /// Create an unbound record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the scope to a context. Only the first call has an effect.
    pub fn bind(&self, options: Arc<ContextOptions>, context_type: &'static str) {
        let _ = self.binding.set((options, context_type));
    }

    /// Options of the bound context; defaults when unbound.
    pub fn options(&self) -> Arc<ContextOptions> {
        self.binding
            .get()
            .map(|(options, _)| options.clone())
            .unwrap_or_default()
    }

    /// Type name of the bound context.
    pub fn context_type(&self) -> Option<&'static str> {
        self.binding.get().map(|(_, name)| *name)
    }
}

/// Registers the core services.
pub trait CoreServicesExt {
    /// Add every core service not already registered.
    ///
    /// Services registered beforehand, by a store or by the application
    /// owning the provider, are kept.
    fn add_keel_core(&mut self) -> &mut Self;
}

impl CoreServicesExt for ServiceCollection {
    fn add_keel_core(&mut self) -> &mut Self {
        self.try_add(ServiceDescriptor::singleton::<CoreServices, _>(|_| {
            Ok(Arc::new(CoreServices))
        }));
        self.try_add(ServiceDescriptor::singleton::<SingletonOptions, _>(|_| {
            Ok(Arc::new(SingletonOptions::new()))
        }));
        self.try_add(
            ServiceDescriptor::singleton::<dyn ModelCustomizer, _>(|_| {
                Ok(Arc::new(DefaultModelCustomizer) as Arc<dyn ModelCustomizer>)
            })
            .implemented_by::<DefaultModelCustomizer>(),
        );
        self.try_add(ServiceDescriptor::singleton::<ModelSource, _>(|r| {
            Ok(Arc::new(ModelSource::new(
                r.get_required::<dyn ModelCustomizer>()?,
            )))
        }));
        self.try_add(
            ServiceDescriptor::singleton::<dyn LoggerFactory, _>(|_| {
                Ok(Arc::new(ConsoleLoggerFactory::new()) as Arc<dyn LoggerFactory>)
            })
            .implemented_by::<ConsoleLoggerFactory>()
            .on_dispose::<dyn LoggerFactory, _>(|factory| factory.dispose()),
        );
        self.try_add(ServiceDescriptor::singleton::<MemoryCache, _>(|_| {
            Ok(Arc::new(MemoryCache::default()))
        }));

        self.try_add(ServiceDescriptor::scoped::<CurrentContext, _>(|_| {
            Ok(Arc::new(CurrentContext::new()))
        }));
        self.try_add(ServiceDescriptor::scoped::<DiagnosticsLogger, _>(|r| {
            let current = r.get_required::<CurrentContext>()?;
            Ok(Arc::new(DiagnosticsLogger::new(
                r.get_required::<dyn LoggerFactory>()?,
                current.options(),
            )))
        }));
        self.try_add(
            ServiceDescriptor::scoped::<dyn ValueGenerator, _>(|_| {
                Ok(Arc::new(SequentialValueGenerator::new()) as Arc<dyn ValueGenerator>)
            })
            .implemented_by::<SequentialValueGenerator>(),
        );
        self.try_add(ServiceDescriptor::scoped::<NavigationFixer, _>(|_| {
            Ok(Arc::new(NavigationFixer::new()))
        }));
        self.try_add_enumerable(
            ServiceDescriptor::scoped::<dyn EntityStateListener, _>(|r| {
                Ok(r.get_required::<NavigationFixer>()? as Arc<dyn EntityStateListener>)
            })
            .implemented_by::<NavigationFixer>(),
        );
        self.try_add_enumerable(
            ServiceDescriptor::scoped::<dyn EntityStateListener, _>(|r| {
                let logger = StateChangeLogger::new(r.get_required::<DiagnosticsLogger>()?);
                Ok(Arc::new(logger) as Arc<dyn EntityStateListener>)
            })
            .implemented_by::<StateChangeLogger>(),
        );
        self.try_add(
            ServiceDescriptor::scoped::<StateManager, _>(|r| {
                Ok(Arc::new(StateManager::new(
                    r.get_all::<dyn EntityStateListener>()?,
                    r.get_required::<NavigationFixer>()?,
                    r.get_required::<dyn ValueGenerator>()?,
                    r.get_required::<DiagnosticsLogger>()?,
                )))
            })
            .disposable::<StateManager>(),
        );
        self
    }
}

/// Apply `replace_service` directives in order.
///
/// A full replacement collapses every registration of its key into one,
/// keeping the first registration's position and lifetime; a key with no
/// registration gets the replacement as a singleton. A specific replacement
/// swaps the registration with the named implementation, keeping its
/// lifetime, and still finds it after a full replacement displaced it.
pub(crate) fn apply_replacements(services: &mut ServiceCollection, replacements: &[ServiceReplacement]) {
    let mut displaced: HashMap<ServiceKey, Vec<&'static str>> = HashMap::new();

    for replacement in replacements {
        let key = replacement.key();
        match replacement.current() {
            None => {
                let existing: Vec<_> = services.iter().filter(|d| d.key() == key).cloned().collect();
                let lifetime = existing
                    .first()
                    .map_or(replacement.descriptor().lifetime(), |d| d.lifetime());
                displaced
                    .entry(key)
                    .or_default()
                    .extend(existing.iter().map(|d| d.implementation()));
                services.replace(replacement.descriptor().clone().with_lifetime(lifetime));
            }
            Some(current) => {
                if services.replace_implementation(current, replacement.descriptor().clone()) {
                    continue;
                }
                let was_displaced = displaced
                    .get(&key)
                    .is_some_and(|names| names.contains(&current));
                if was_displaced {
                    if let Some(slot) = services.iter_mut().find(|d| d.key() == key) {
                        *slot = replacement.descriptor().clone().with_lifetime(slot.lifetime());
                    }
                } else {
                    trace!("No {} registration of {} to replace", key, current);
                }
            }
        }
    }
}

/// Build the internal provider for `options`.
pub(crate) fn build_internal_provider(
    options: &ContextOptions,
    effective: &EffectiveServices,
) -> ContextResult<ServiceProvider> {
    let mut services = ServiceCollection::new();

    if let Some(factory) = &effective.logger_factory {
        services.add_instance::<dyn LoggerFactory>(factory.clone());
    }
    if let Some(cache) = &effective.memory_cache {
        services.add_instance(cache.clone());
    }
    for interceptor in options.singleton_interceptors() {
        services.add_instance::<dyn SingletonInterceptor>(interceptor.clone());
    }
    if let Some(store) = options.store() {
        store.register_services(&mut services);
    }
    services.add_keel_core();
    apply_replacements(&mut services, options.replacements());

    let provider = services.build_provider_with(ProviderOptions::new().validate_scopes(true));
    debug!(
        "Built internal service provider {} ({} registrations, store={})",
        provider.root_id(),
        services.len(),
        options.store().map_or("none", |s| s.name())
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ContextOptionsBuilder;
    use keel_log::{ListLoggerFactory, Logger};

    struct Audit;

    impl ModelCustomizer for Audit {
        fn customize(&self, builder: &mut crate::metadata::ModelBuilder, _context: &str) {
            builder.entity("AuditLog").key("Id");
        }
    }

    struct Quiet;

    impl LoggerFactory for Quiet {
        fn create_logger(&self, category: &str) -> Arc<dyn Logger> {
            ListLoggerFactory::new().create_logger(category)
        }
    }

    fn core() -> ServiceCollection {
        let mut services = ServiceCollection::new();
        services.add_keel_core();
        services
    }

    #[test]
    fn test_core_services_resolve_in_scope() {
        let provider = core().build_provider_with(ProviderOptions::new().validate_scopes(true));
        let scope = provider.create_scope().unwrap();

        let manager = scope.get_required::<StateManager>().unwrap();
        assert!(Arc::ptr_eq(&manager, &scope.get_required::<StateManager>().unwrap()));
        assert_eq!(scope.get_all::<dyn EntityStateListener>().unwrap().len(), 2);
        assert!(scope.contains::<CoreServices>());
        assert!(provider.get::<StateManager>().is_err());
    }

    #[test]
    fn test_add_keel_core_keeps_existing_registrations() {
        let mut services = ServiceCollection::new();
        services.add_instance::<dyn LoggerFactory>(Arc::new(Quiet));
        services.add_keel_core();
        services.add_keel_core();

        let count = services
            .iter()
            .filter(|d| d.key() == ServiceKey::of::<dyn LoggerFactory>())
            .count();
        assert_eq!(count, 1);
        assert_eq!(
            services
                .iter()
                .filter(|d| d.key() == ServiceKey::of::<dyn EntityStateListener>())
                .count(),
            2
        );
    }

    #[test]
    fn test_full_replacement_keeps_lifetime() {
        let options = ContextOptionsBuilder::new()
            .replace_service::<dyn ModelCustomizer, Audit, _>(|_| {
                Ok(Arc::new(Audit) as Arc<dyn ModelCustomizer>)
            })
            .build();
        let mut services = core();
        apply_replacements(&mut services, options.replacements());

        let customizer = services
            .iter()
            .find(|d| d.key() == ServiceKey::of::<dyn ModelCustomizer>())
            .unwrap();
        assert!(customizer.implementation().ends_with("Audit"));
        assert_eq!(customizer.lifetime(), keel_di::Lifetime::Singleton);
    }

    #[test]
    fn test_full_replacement_collapses_multi_registration() {
        let options = ContextOptionsBuilder::new()
            .replace_service::<dyn EntityStateListener, NavigationFixer, _>(|r| {
                Ok(r.get_required::<NavigationFixer>()? as Arc<dyn EntityStateListener>)
            })
            .build();
        let mut services = core();
        apply_replacements(&mut services, options.replacements());

        let listeners: Vec<_> = services
            .iter()
            .filter(|d| d.key() == ServiceKey::of::<dyn EntityStateListener>())
            .collect();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].lifetime(), keel_di::Lifetime::Scoped);
    }

    #[test]
    fn test_specific_replacement_after_full_replacement() {
        let options = ContextOptionsBuilder::new()
            .replace_service::<dyn ModelCustomizer, DefaultModelCustomizer, _>(|_| {
                Ok(Arc::new(DefaultModelCustomizer) as Arc<dyn ModelCustomizer>)
            })
            .replace_service_implementation::<dyn ModelCustomizer, DefaultModelCustomizer, Audit, _>(
                |_| Ok(Arc::new(Audit) as Arc<dyn ModelCustomizer>),
            )
            .build();
        let mut services = core();
        apply_replacements(&mut services, options.replacements());

        let customizer = services
            .iter()
            .find(|d| d.key() == ServiceKey::of::<dyn ModelCustomizer>())
            .unwrap();
        assert!(customizer.implementation().ends_with("Audit"));
    }

    #[test]
    fn test_replacement_of_missing_key_is_added() {
        let options = ContextOptionsBuilder::new()
            .replace_service::<Audit, Audit, _>(|_| Ok(Arc::new(Audit)))
            .build();
        let mut services = core();
        apply_replacements(&mut services, options.replacements());
        assert!(services.contains::<Audit>());
    }

    #[test]
    fn test_singleton_options_detect_changes() {
        let record = SingletonOptions::new();
        let quiet = ContextOptionsBuilder::new().build();
        let loud = ContextOptionsBuilder::new()
            .enable_sensitive_data_logging(true)
            .build();

        record.ensure(&quiet).unwrap();
        record.ensure(&quiet).unwrap();
        assert!(matches!(
            record.ensure(&loud),
            Err(ContextError::SingletonOptionChanged {
                option: "enable_sensitive_data_logging"
            })
        ));
    }

    #[test]
    fn test_internal_provider_adopts_effective_services() {
        let factory = ListLoggerFactory::new();
        let effective = EffectiveServices {
            logger_factory: Some(Arc::new(factory.clone())),
            memory_cache: None,
        };
        let provider = build_internal_provider(&ContextOptions::default(), &effective).unwrap();
        let scope = provider.create_scope().unwrap();

        let diagnostics = scope.get_required::<DiagnosticsLogger>().unwrap();
        diagnostics
            .log(crate::options::CoreEventId::ContextInitialized, || "ready".into())
            .unwrap();
        assert!(factory.contains("ready"));
    }
}
