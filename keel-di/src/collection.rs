//! Service collection: the registration pass before a provider is built.

use crate::{
    DiResult, Lifetime, ProviderOptions, Resolver, ServiceDescriptor, ServiceKey, ServiceProvider,
};
use keel_log::{debug, trace};
use std::sync::Arc;

/// Ordered list of service registrations.
///
/// Several registrations may share a key; the last one is the primary
/// resolution target and all of them are returned by
/// [`ServiceProvider::get_all`].
#[derive(Clone, Default, Debug)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration.
    pub fn add(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        trace!(
            "Registering {} as {} ({})",
            descriptor.key(),
            descriptor.implementation(),
            descriptor.lifetime()
        );
        self.descriptors.push(descriptor);
        self
    }

    /// Append a registration unless one already exists for its key.
    ///
    /// Returns `true` if the descriptor was added.
    pub fn try_add(&mut self, descriptor: ServiceDescriptor) -> bool {
        if self.contains_key(&descriptor.key()) {
            trace!("Skipping {}: already registered", descriptor.key());
            return false;
        }
        self.add(descriptor);
        true
    }

    /// Append a registration unless the same implementation is already
    /// registered for its key.
    pub fn try_add_enumerable(&mut self, descriptor: ServiceDescriptor) -> bool {
        let exists = self.descriptors.iter().any(|existing| {
            existing.key() == descriptor.key()
                && existing.implementation() == descriptor.implementation()
        });
        if exists {
            return false;
        }
        self.add(descriptor);
        true
    }

    /// Remove every registration for the descriptor's key and put the new one
    /// where the first removed registration was.
    pub fn replace(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        let key = descriptor.key();
        let position = self.descriptors.iter().position(|d| d.key() == key);
        self.descriptors.retain(|d| d.key() != key);

        match position {
            Some(index) => {
                debug!("Replacing registrations for {}", key);
                self.descriptors.insert(index, descriptor);
            }
            None => {
                self.descriptors.push(descriptor);
            }
        }
        self
    }

    /// Replace only the registration whose implementation is named
    /// `implementation`, keeping its position and lifetime.
    ///
    /// Returns `false` if no such registration exists.
    pub fn replace_implementation(
        &mut self,
        implementation: &str,
        descriptor: ServiceDescriptor,
    ) -> bool {
        let key = descriptor.key();
        match self
            .descriptors
            .iter_mut()
            .find(|d| d.key() == key && d.implementation() == implementation)
        {
            Some(existing) => {
                debug!(
                    "Replacing {} implementation {} with {}",
                    key,
                    implementation,
                    descriptor.implementation()
                );
                *existing = descriptor.with_lifetime(existing.lifetime());
                true
            }
            None => false,
        }
    }

    /// Remove every registration for `key`.
    pub fn remove_all(&mut self, key: &ServiceKey) -> usize {
        let before = self.descriptors.len();
        self.descriptors.retain(|d| d.key() != *key);
        before - self.descriptors.len()
    }

    /// Register a singleton factory.
    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Singleton, factory))
    }

    /// Register an existing instance as a singleton.
    pub fn add_instance<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::instance(instance))
    }

    /// Register a scoped factory.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Scoped, factory))
    }

    /// Register a transient factory.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> DiResult<Arc<T>> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Transient, factory))
    }

    /// Whether any registration exists for `T`.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.contains_key(&ServiceKey::of::<T>())
    }

    /// Whether any registration exists for `key`.
    pub fn contains_key(&self, key: &ServiceKey) -> bool {
        self.descriptors.iter().any(|d| d.key() == *key)
    }

    /// Registrations in order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.iter()
    }

    /// Mutable access to registrations in order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServiceDescriptor> {
        self.descriptors.iter_mut()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Build a root provider without scope validation.
    pub fn build_provider(&self) -> ServiceProvider {
        self.build_provider_with(ProviderOptions::default())
    }

    /// Build a root provider.
    pub fn build_provider_with(&self, options: ProviderOptions) -> ServiceProvider {
        ServiceProvider::build(self.descriptors.clone(), options)
    }
}
