//! Registering contexts in an application container.

use crate::context::{ContextConstructor, ContextDefinition, DbContext};
use crate::error::{ContextError, ContextResult};
use crate::factory::ContextFactory;
use crate::options::{ContextOptions, ContextOptionsBuilder, OptionsFor};
use crate::pool::{ContextPool, PoolOptions, PooledContext};
use keel_di::{DiError, DiResult, Lifetime, Resolver, ServiceCollection, ServiceDescriptor, ServiceProvider};
use keel_log::{debug, trace};
use std::any::type_name;
use std::cmp::Reverse;
use std::sync::Arc;

type Configure = Arc<dyn Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync>;

/// Context registrations on a [`ServiceCollection`].
///
/// Options are registered as [`OptionsFor<C>`] (and as plain
/// [`ContextOptions`] if nothing else registered those first), built for
/// `C` with the resolving provider as the application provider. Contexts
/// are activated through the most specific
/// [`ContextConstructor`](crate::ContextConstructor) whose dependencies
/// are registered.
///
/// ```rust
/// use keel_core::{ContextConstructor, ContextDefinition, DbContext, ServiceCollectionExt};
/// use keel_di::{Lifetime, ProviderOptions, ServiceCollection};
///
/// struct Shop;
///
/// impl ContextDefinition for Shop {
///     fn constructors() -> Vec<ContextConstructor<Self>> {
///         vec![ContextConstructor::parameterless(|| Shop).with_options()]
///     }
/// }
///
/// let mut services = ServiceCollection::new();
/// services.add_db_context::<Shop>(Lifetime::Scoped, Lifetime::Scoped);
///
/// let root = services.build_provider_with(ProviderOptions::new().validate_scopes(true));
/// let scope = root.create_scope().unwrap();
/// let context = scope.get_required::<DbContext<Shop>>().unwrap();
/// assert!(!context.is_initialized());
/// ```
pub trait ServiceCollectionExt {
    /// Register `C` with options its `on_configuring` completes.
    fn add_db_context<C: ContextDefinition>(
        &mut self,
        context_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> &mut Self;

    /// Register `C` with options built by `configure`.
    ///
    /// Fails with [`ContextError::MissingConstructor`] when no constructor
    /// of `C` accepts options.
    fn add_db_context_with<C, F>(
        &mut self,
        configure: F,
        context_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static;

    /// Register a [`ContextFactory<C>`] creating caller-owned contexts.
    fn add_db_context_factory<C, F>(
        &mut self,
        configure: F,
        factory_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static;

    /// Register a [`ContextPool<C>`]. Each scope leases one context as
    /// [`PooledContext<C>`], also resolvable as `DbContext<C>`, and returns
    /// it when the scope is disposed.
    fn add_db_context_pool<C, F>(&mut self, configure: F, pool: PoolOptions) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static;
}

impl ServiceCollectionExt for ServiceCollection {
    fn add_db_context<C: ContextDefinition>(
        &mut self,
        context_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> &mut Self {
        add_options::<C>(self, None, options_lifetime);
        add_context::<C>(self, context_lifetime);
        self
    }

    fn add_db_context_with<C, F>(
        &mut self,
        configure: F,
        context_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static,
    {
        require_options_constructor::<C>()?;
        add_options::<C>(self, Some(Arc::new(configure)), options_lifetime);
        add_context::<C>(self, context_lifetime);
        Ok(self)
    }

    fn add_db_context_factory<C, F>(
        &mut self,
        configure: F,
        factory_lifetime: Lifetime,
        options_lifetime: Lifetime,
    ) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static,
    {
        require_options_constructor::<C>()?;
        add_options::<C>(self, Some(Arc::new(configure)), options_lifetime);
        self.try_add(ServiceDescriptor::new::<ContextFactory<C>, _>(
            factory_lifetime,
            |r| {
                let options = r.get_required::<OptionsFor<C>>()?.shared();
                Ok(Arc::new(ContextFactory::new(options, r.provider())))
            },
        ));
        debug!(
            "Registered context factory for {} ({})",
            type_name::<C>(),
            factory_lifetime
        );
        Ok(self)
    }

    fn add_db_context_pool<C, F>(&mut self, configure: F, pool: PoolOptions) -> ContextResult<&mut Self>
    where
        C: ContextDefinition,
        F: Fn(&ServiceProvider, ContextOptionsBuilder) -> ContextOptionsBuilder + Send + Sync + 'static,
    {
        require_options_constructor::<C>()?;
        add_options::<C>(self, Some(Arc::new(configure)), Lifetime::Singleton);
        self.try_add(
            ServiceDescriptor::singleton::<ContextPool<C>, _>(move |r| {
                let options = r.get_required::<OptionsFor<C>>()?.shared();
                Ok(Arc::new(ContextPool::new(options, r.provider(), pool)))
            })
            .disposable::<ContextPool<C>>(),
        );
        self.try_add(
            ServiceDescriptor::scoped::<PooledContext<C>, _>(|r| {
                let pool = r.get_required::<ContextPool<C>>()?;
                let lease = PooledContext::rent(&pool)
                    .map_err(|err| DiError::activation(type_name::<C>(), err))?;
                Ok(Arc::new(lease))
            })
            .on_dispose::<PooledContext<C>, _>(|lease| lease.release()),
        );
        self.try_add(ServiceDescriptor::scoped::<DbContext<C>, _>(|r| {
            Ok(r.get_required::<PooledContext<C>>()?.context().clone())
        }));
        debug!(
            "Registered context pool for {} (max {})",
            type_name::<C>(),
            pool.size()
        );
        Ok(self)
    }
}

fn require_options_constructor<C: ContextDefinition>() -> ContextResult<()> {
    if C::constructors().iter().any(|c| c.accepts_options()) {
        return Ok(());
    }
    Err(ContextError::MissingConstructor {
        context: type_name::<C>(),
    })
}

fn add_options<C: ContextDefinition>(
    services: &mut ServiceCollection,
    configure: Option<Configure>,
    lifetime: Lifetime,
) {
    services.add(ServiceDescriptor::new::<OptionsFor<C>, _>(lifetime, move |r| {
        let builder =
            ContextOptionsBuilder::for_context::<C>().use_application_service_provider(r.provider());
        let builder = match &configure {
            Some(configure) => configure(r.provider(), builder),
            None => builder,
        };
        trace!("Built options for {}", type_name::<C>());
        Ok(Arc::new(OptionsFor::new(builder.build())))
    }));
    services.try_add(ServiceDescriptor::new::<ContextOptions, _>(lifetime, |r| {
        Ok(r.get_required::<OptionsFor<C>>()?.shared())
    }));
}

fn add_context<C: ContextDefinition>(services: &mut ServiceCollection, lifetime: Lifetime) {
    services.try_add(
        ServiceDescriptor::new::<DbContext<C>, _>(lifetime, |r| Ok(Arc::new(activate::<C>(r)?)))
            .on_dispose::<DbContext<C>, _>(|context| context.dispose()),
    );
    debug!("Registered context {} ({})", type_name::<C>(), lifetime);
}

/// Most specific constructor of `C` whose dependencies `resolver` can
/// satisfy. Constructors taking options are only considered when
/// `options_available`.
pub(crate) fn select_constructor<C: ContextDefinition>(
    resolver: &Resolver<'_>,
    options_available: bool,
) -> DiResult<ContextConstructor<C>> {
    let mut constructors = C::constructors();
    constructors.sort_by_key(|c| Reverse(c.specificity()));
    constructors
        .into_iter()
        .find(|c| {
            (options_available || !c.accepts_options())
                && c.dependencies().iter().all(|key| resolver.contains_key(key))
        })
        .ok_or_else(|| {
            debug!("No usable constructor for {}", type_name::<C>());
            DiError::activation(type_name::<C>(), ContextError::NoCoreServices)
        })
}

fn activate<C: ContextDefinition>(resolver: &Resolver<'_>) -> DiResult<DbContext<C>> {
    let constructor = select_constructor::<C>(resolver, resolver.contains::<OptionsFor<C>>())?;
    let definition = constructor.build(resolver)?;
    if !constructor.accepts_options() {
        return Ok(DbContext::new(definition));
    }
    let options = resolver.get_required::<OptionsFor<C>>()?.shared();
    DbContext::with_options(definition, options)
        .map_err(|err| DiError::activation(type_name::<C>(), err))
}
