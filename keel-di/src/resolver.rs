//! Resolution context handed to factories.

use crate::descriptor::AnyArc;
use crate::{DiError, DiResult, Lifetime, ServiceKey, ServiceProvider};
use keel_log::trace;
use std::sync::Arc;

/// A registration currently being constructed.
#[derive(Debug, Clone, Copy)]
struct Frame {
    slot: usize,
    key: ServiceKey,
    lifetime: Lifetime,
}

/// Resolves services on behalf of a provider or a factory.
///
/// Factories receive a `Resolver` bound to the provider that owns the instance
/// being built: the root for singletons, the requesting scope otherwise. The
/// resolver remembers which registrations are under construction so that cycles
/// and scoped services captured by singletons are reported instead of
/// deadlocking or leaking.
///
/// ```rust
/// use keel_di::{ServiceCollection, ServiceDescriptor};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Repo { config: Arc<Config> }
///
/// let mut services = ServiceCollection::new();
/// services.add_instance(Arc::new(Config { url: "mem://".into() }));
/// services.add_scoped::<Repo, _>(|r| Ok(Arc::new(Repo { config: r.get_required()? })));
///
/// let scope = services.build_provider().create_scope().unwrap();
/// assert_eq!(scope.get_required::<Repo>().unwrap().config.url, "mem://");
/// ```
pub struct Resolver<'a> {
    provider: &'a ServiceProvider,
    parent: Option<&'a Resolver<'a>>,
    frame: Option<Frame>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(provider: &'a ServiceProvider) -> Self {
        Self {
            provider,
            parent: None,
            frame: None,
        }
    }

    /// Provider this resolver resolves from.
    pub fn provider(&self) -> &ServiceProvider {
        self.provider
    }

    /// Resolve the primary registration for `T`, or `None` if not registered.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Option<Arc<T>>> {
        let key = ServiceKey::of::<T>();
        match self.provider.slots_for(&key).and_then(|slots| slots.last()) {
            Some(&slot) => {
                let instance = self.resolve_slot(slot)?;
                self.provider.downcast::<T>(key, &instance).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Resolve the primary registration for `T`.
    pub fn get_required<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.get::<T>()?
            .ok_or_else(|| DiError::NotFound(std::any::type_name::<T>()))
    }

    /// Resolve every registration for `T` in registration order.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
        let key = ServiceKey::of::<T>();
        let slots = self.provider.slots_for(&key).unwrap_or(&[]);
        slots
            .iter()
            .map(|&slot| {
                let instance = self.resolve_slot(slot)?;
                self.provider.downcast::<T>(key, &instance)
            })
            .collect()
    }

    /// Whether `T` is registered.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.provider.contains::<T>()
    }

    /// Whether `key` is registered.
    pub fn contains_key(&self, key: &ServiceKey) -> bool {
        self.provider.contains_key(key)
    }

    /// Lifetime of the outermost registration under construction, if any.
    pub fn requesting_lifetime(&self) -> Option<Lifetime> {
        self.frames().last().map(|f| f.lifetime)
    }

    fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut current = Some(self);
        while let Some(resolver) = current {
            if let Some(frame) = resolver.frame {
                frames.push(frame);
            }
            current = resolver.parent;
        }
        frames
    }

    fn chain_description(&self, next: ServiceKey) -> String {
        let mut names: Vec<&str> = self.frames().iter().rev().map(|f| f.key.short_name()).collect();
        names.push(next.short_name());
        names.join(" -> ")
    }

    fn resolve_slot(&self, slot: usize) -> DiResult<AnyArc> {
        self.provider.ensure_live()?;

        let descriptor = self.provider.descriptor(slot);
        let key = descriptor.key();
        let lifetime = descriptor.lifetime();
        let frames = self.frames();

        if frames.iter().any(|f| f.slot == slot) {
            return Err(DiError::Circular(self.chain_description(key)));
        }

        let validate = self.provider.validates_scopes();
        if validate {
            if lifetime == Lifetime::Scoped
                && let Some(owner) = frames.iter().find(|f| f.lifetime == Lifetime::Singleton)
            {
                return Err(DiError::ScopeValidation(format!(
                    "cannot consume scoped service '{}' from singleton '{}'",
                    key, owner.key
                )));
            }
            if lifetime != Lifetime::Singleton && self.provider.is_root() && frames.is_empty() {
                return Err(DiError::ScopeValidation(format!(
                    "cannot resolve {} service '{}' from the root provider",
                    lifetime, key
                )));
            }
        }

        let frame = Frame {
            slot,
            key,
            lifetime,
        };

        match lifetime {
            Lifetime::Singleton => {
                let cell = self.provider.singleton_cell(slot);
                if let Some(instance) = cell.get() {
                    return Ok(instance.clone());
                }
                let root = self.provider.root();
                let instance = cell.get_or_try_init(|| {
                    trace!("Constructing singleton {}", key);
                    let child = Resolver {
                        provider: &root,
                        parent: Some(self),
                        frame: Some(frame),
                    };
                    let instance = descriptor.create(&child)?;
                    root.track_singleton(slot, &instance);
                    Ok::<_, DiError>(instance)
                })?;
                Ok(instance.clone())
            }
            Lifetime::Scoped => {
                let cell = self.provider.scoped_cell(slot);
                if let Some(instance) = cell.get() {
                    return Ok(instance.clone());
                }
                let instance = cell.get_or_try_init(|| {
                    trace!("Constructing scoped {}", key);
                    let instance = descriptor.create(&self.child(frame))?;
                    self.provider.track_scoped(slot, &instance);
                    Ok::<_, DiError>(instance)
                })?;
                Ok(instance.clone())
            }
            Lifetime::Transient => {
                trace!("Constructing transient {}", key);
                let instance = descriptor.create(&self.child(frame))?;
                self.provider.track_scoped(slot, &instance);
                Ok(instance)
            }
        }
    }

    fn child<'b>(&'b self, frame: Frame) -> Resolver<'b> {
        Resolver {
            provider: self.provider,
            parent: Some(self),
            frame: Some(frame),
        }
    }
}
