//! Service descriptors: a key, a lifetime and a factory.

use crate::dispose::{Dispose, Disposer};
use crate::{DiError, DiResult, Lifetime, Resolver, ServiceKey};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A resolved instance, type-erased.
///
/// The payload is always an `Arc<T>` for the registered `T`, which lets
/// unsized services such as trait objects go through `Any`.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Type-erased factory.
pub(crate) type Factory = Arc<dyn Fn(&Resolver<'_>) -> DiResult<AnyArc> + Send + Sync>;

/// Describes how to build one implementation of a service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    key: ServiceKey,
    implementation: &'static str,
    lifetime: Lifetime,
    factory: Factory,
    disposer: Option<Disposer>,
}

impl ServiceDescriptor {
    /// Create a descriptor from a factory.
    ///
    /// The implementation name defaults to the service type's name; use
    /// [`implemented_by`](Self::implemented_by) to name the concrete type.
    pub fn new<T, F>(lifetime: Lifetime, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        let factory = erased(move |resolver| {
            let instance = factory(resolver)?;
            Ok(Arc::new(instance) as AnyArc)
        });

        Self {
            key: ServiceKey::of::<T>(),
            implementation: std::any::type_name::<T>(),
            lifetime,
            factory: Arc::new(factory),
            disposer: None,
        }
    }

    /// Singleton built by `factory`.
    pub fn singleton<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Singleton, factory)
    }

    /// Scoped service built by `factory`.
    pub fn scoped<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Scoped, factory)
    }

    /// Transient service built by `factory`.
    pub fn transient<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Transient, factory)
    }

    /// Singleton wrapping an existing instance.
    ///
    /// The container never disposes instances it did not create.
    pub fn instance<T>(instance: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self::new(Lifetime::Singleton, move |_| Ok(instance.clone()))
    }

    /// Name the concrete implementation type.
    pub fn implemented_by<I: ?Sized + 'static>(mut self) -> Self {
        self.implementation = std::any::type_name::<I>();
        self
    }

    /// Run `dispose` on every instance this descriptor creates when the owning
    /// container is disposed.
    ///
    /// `T` must be the registered service type.
    pub fn on_dispose<T, D>(mut self, dispose: D) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        D: Fn(&T) + Send + Sync + 'static,
    {
        self.disposer = Some(Arc::new(move |instance: &AnyArc| {
            if let Some(service) = instance.downcast_ref::<Arc<T>>() {
                dispose(service);
            }
        }));
        self
    }

    /// Dispose created instances through their [`Dispose`] impl.
    pub fn disposable<T>(self) -> Self
    where
        T: Dispose + 'static,
    {
        self.on_dispose::<T, _>(|service| service.dispose())
    }

    /// Same factory and disposal hook, different lifetime.
    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Service key.
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    /// Implementation name.
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    /// Lifetime.
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub(crate) fn create(&self, resolver: &Resolver<'_>) -> DiResult<AnyArc> {
        (self.factory)(resolver)
    }

    pub(crate) fn disposer(&self) -> Option<&Disposer> {
        self.disposer.as_ref()
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("key", &self.key.name())
            .field("implementation", &self.implementation)
            .field("lifetime", &self.lifetime)
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}

fn erased<F>(factory: F) -> F
where
    F: Fn(&Resolver<'_>) -> DiResult<AnyArc> + Send + Sync + 'static,
{
    factory
}

/// Recover an `Arc<T>` from a type-erased instance.
pub(crate) fn downcast<T: ?Sized + Send + Sync + 'static>(
    key: ServiceKey,
    instance: &AnyArc,
) -> DiResult<Arc<T>> {
    instance
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(DiError::TypeMismatch(key.name()))
}
