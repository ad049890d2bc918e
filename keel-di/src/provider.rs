//! Root providers and scopes.

use crate::descriptor::{AnyArc, downcast};
use crate::dispose::DisposeBag;
use crate::{DiError, DiResult, Resolver, ServiceDescriptor, ServiceKey};
use keel_log::{debug, info, trace};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Options applied when building a root provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Reject scoped/transient resolution on the root and scoped services
    /// captured by singletons.
    ///
    /// Without validation, disposable scoped and transient instances
    /// resolved from the root are owned by the root and released only when
    /// it is disposed. A long-lived root resolving disposable transients
    /// keeps every one of them alive; see
    /// [`ServiceProvider::pending_disposals`].
    pub validate_scopes: bool,
}

impl ProviderOptions {
    /// Create default options (no validation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options from environment variables.
    ///
    /// - `KEEL_VALIDATE_SCOPES=1|true` enables scope validation.
    pub fn from_env() -> Self {
        let validate_scopes = std::env::var("KEEL_VALIDATE_SCOPES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { validate_scopes }
    }

    /// Enable or disable scope validation. See
    /// [`validate_scopes`](Self::validate_scopes) for what an unvalidated
    /// root retains.
    pub fn validate_scopes(mut self, enabled: bool) -> Self {
        self.validate_scopes = enabled;
        self
    }
}

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Disposables collected by a root between backlog reports.
pub(crate) const ROOT_DISPOSABLE_REPORT_STEP: usize = 256;

fn root_backlog_reached(pending: usize) -> bool {
    pending > 0 && pending % ROOT_DISPOSABLE_REPORT_STEP == 0
}

/// Per-scope instance cache.
pub(crate) struct ScopeState {
    id: u64,
    slots: Vec<OnceCell<AnyArc>>,
    disposables: DisposeBag,
    disposed: AtomicBool,
}

impl ScopeState {
    fn new(id: u64, size: usize) -> Self {
        Self {
            id,
            slots: (0..size).map(|_| OnceCell::new()).collect(),
            disposables: DisposeBag::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns `false` if the scope was already disposed.
    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let count = self.disposables.drain();
        debug!("Disposed scope {} ({} instances)", self.id, count);
        true
    }
}

impl Drop for ScopeState {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Shared state of a root provider.
pub(crate) struct RootState {
    id: u64,
    options: ProviderOptions,
    descriptors: Vec<ServiceDescriptor>,
    index: HashMap<ServiceKey, Vec<usize>>,
    singletons: Vec<OnceCell<AnyArc>>,
    singleton_disposables: DisposeBag,
    /// Scoped/transient instances resolved on the root when validation is off.
    root_scope: ScopeState,
    disposed: AtomicBool,
    scope_counter: AtomicU64,
}

impl RootState {
    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.root_scope.dispose();
        let count = self.singleton_disposables.drain();
        info!("Disposed service provider {} ({} singletons)", self.id, count);
        true
    }
}

impl Drop for RootState {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A built service provider: either a root or a scope created from one.
///
/// Handles are cheap to clone and all clones share the same caches.
#[derive(Clone)]
pub struct ServiceProvider {
    pub(crate) root: Arc<RootState>,
    pub(crate) scope: Option<Arc<ScopeState>>,
}

impl ServiceProvider {
    pub(crate) fn build(descriptors: Vec<ServiceDescriptor>, options: ProviderOptions) -> Self {
        let id = NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed);
        let mut index: HashMap<ServiceKey, Vec<usize>> = HashMap::new();
        for (slot, descriptor) in descriptors.iter().enumerate() {
            index.entry(descriptor.key()).or_default().push(slot);
        }

        debug!(
            "Building service provider {} ({} registrations, validate_scopes={})",
            id,
            descriptors.len(),
            options.validate_scopes
        );

        let size = descriptors.len();
        let root = RootState {
            id,
            options,
            index,
            singletons: (0..size).map(|_| OnceCell::new()).collect(),
            singleton_disposables: DisposeBag::default(),
            root_scope: ScopeState::new(0, size),
            descriptors,
            disposed: AtomicBool::new(false),
            scope_counter: AtomicU64::new(1),
        };

        Self {
            root: Arc::new(root),
            scope: None,
        }
    }

    /// Create a new scope sharing this provider's root.
    ///
    /// Calling this on a scope produces a sibling scope, not a nested one.
    pub fn create_scope(&self) -> DiResult<ServiceProvider> {
        self.ensure_live()?;
        let scope_id = self.root.scope_counter.fetch_add(1, Ordering::Relaxed);
        trace!("Creating scope {} on provider {}", scope_id, self.root.id);
        Ok(Self {
            root: self.root.clone(),
            scope: Some(Arc::new(ScopeState::new(
                scope_id,
                self.root.descriptors.len(),
            ))),
        })
    }

    /// Resolve the primary registration for `T`, or `None` if not registered.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Option<Arc<T>>> {
        Resolver::new(self).get::<T>()
    }

    /// Resolve the primary registration for `T`.
    pub fn get_required<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        Resolver::new(self).get_required::<T>()
    }

    /// Resolve every registration for `T` in registration order.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
        Resolver::new(self).get_all::<T>()
    }

    /// Resolver rooted at this provider, for code that activates services
    /// the same way a factory would.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self)
    }

    /// Whether `T` is registered.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.contains_key(&ServiceKey::of::<T>())
    }

    /// Whether `key` is registered.
    pub fn contains_key(&self, key: &ServiceKey) -> bool {
        self.root.index.contains_key(key)
    }

    /// Dispose this provider.
    ///
    /// A scope disposes the instances it created; a root disposes its
    /// singletons and anything resolved on it directly. Scopes created from a
    /// disposed root refuse further resolution. Idempotent.
    pub fn dispose(&self) {
        match &self.scope {
            Some(scope) => {
                scope.dispose();
            }
            None => {
                self.root.dispose();
            }
        }
    }

    /// Whether this provider, or the root it belongs to, has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.root.disposed.load(Ordering::Acquire)
            || self
                .scope
                .as_ref()
                .is_some_and(|s| s.disposed.load(Ordering::Acquire))
    }

    /// Whether this is a root provider.
    pub fn is_root(&self) -> bool {
        self.scope.is_none()
    }

    /// Whether the root validates scopes.
    pub fn validates_scopes(&self) -> bool {
        self.root.options.validate_scopes
    }

    /// Identifier of the root provider.
    pub fn root_id(&self) -> u64 {
        self.root.id
    }

    /// Identifier of this scope; `None` for a root.
    pub fn scope_id(&self) -> Option<u64> {
        self.scope.as_ref().map(|s| s.id)
    }

    /// Handle onto the root provider.
    pub fn root(&self) -> ServiceProvider {
        Self {
            root: self.root.clone(),
            scope: None,
        }
    }

    /// Whether both handles share the same root.
    pub fn same_root(&self, other: &ServiceProvider) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// Non-owning handle onto this provider.
    ///
    /// Services that need to remember the container that created them hold
    /// one of these so the container's caches do not keep themselves alive.
    pub fn downgrade(&self) -> WeakServiceProvider {
        WeakServiceProvider {
            root: Arc::downgrade(&self.root),
            scope: self.scope.as_ref().map(Arc::downgrade),
        }
    }

    /// Number of disposable instances awaiting disposal in this provider.
    pub fn pending_disposals(&self) -> usize {
        match &self.scope {
            Some(scope) => scope.disposables.len(),
            None => self.root.singleton_disposables.len() + self.root.root_scope.disposables.len(),
        }
    }

    pub(crate) fn ensure_live(&self) -> DiResult<()> {
        if self.is_disposed() {
            return Err(DiError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn slots_for(&self, key: &ServiceKey) -> Option<&[usize]> {
        self.root.index.get(key).map(Vec::as_slice)
    }

    pub(crate) fn descriptor(&self, slot: usize) -> &ServiceDescriptor {
        &self.root.descriptors[slot]
    }

    /// Cache owning scoped instances for this handle.
    pub(crate) fn scope_state(&self) -> &ScopeState {
        match &self.scope {
            Some(scope) => scope,
            None => &self.root.root_scope,
        }
    }

    pub(crate) fn singleton_cell(&self, slot: usize) -> &OnceCell<AnyArc> {
        &self.root.singletons[slot]
    }

    pub(crate) fn scoped_cell(&self, slot: usize) -> &OnceCell<AnyArc> {
        &self.scope_state().slots[slot]
    }

    /// Record a freshly created instance for disposal, if its descriptor
    /// asks for it.
    pub(crate) fn track_singleton(&self, slot: usize, instance: &AnyArc) {
        if let Some(disposer) = self.descriptor(slot).disposer() {
            self.root
                .singleton_disposables
                .push(instance.clone(), disposer.clone());
        }
    }

    pub(crate) fn track_scoped(&self, slot: usize, instance: &AnyArc) {
        let Some(disposer) = self.descriptor(slot).disposer() else {
            return;
        };
        let pending = self
            .scope_state()
            .disposables
            .push(instance.clone(), disposer.clone());
        if self.scope.is_none() && root_backlog_reached(pending) {
            debug!(
                "Root provider {} holds {} disposable instances until it is disposed; resolve {} from a scope",
                self.root.id,
                pending,
                self.descriptor(slot).key()
            );
        }
    }

    pub(crate) fn downcast<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: ServiceKey,
        instance: &AnyArc,
    ) -> DiResult<Arc<T>> {
        downcast::<T>(key, instance)
    }
}

/// Non-owning handle created by [`ServiceProvider::downgrade`].
#[derive(Clone, Default)]
pub struct WeakServiceProvider {
    root: Weak<RootState>,
    scope: Option<Weak<ScopeState>>,
}

impl WeakServiceProvider {
    /// Recover the provider if it is still alive.
    pub fn upgrade(&self) -> Option<ServiceProvider> {
        let root = self.root.upgrade()?;
        let scope = match &self.scope {
            Some(scope) => Some(scope.upgrade()?),
            None => None,
        };
        Some(ServiceProvider { root, scope })
    }

    /// Identifier of the root provider, if it is still alive.
    pub fn root_id(&self) -> Option<u64> {
        self.root.upgrade().map(|root| root.id)
    }
}

impl fmt::Debug for WeakServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakServiceProvider")
            .field("root", &self.root_id())
            .finish()
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("root", &self.root.id)
            .field("scope", &self.scope_id())
            .field("registrations", &self.root.descriptors.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
