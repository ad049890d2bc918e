//! The per-context entity state tracker.

use super::fixup::NavigationFixer;
use super::graph;
use super::{EntityState, EntityStateListener, GraphOperation, InternalEntry};
use crate::diagnostics::DiagnosticsLogger;
use crate::entity::{EntityRef, identity};
use crate::error::{ContextError, ContextResult};
use crate::metadata::{EntityMetadata, MetadataProvider, Model};
use crate::store::PendingChange;
use crate::value_generation::ValueGenerator;
use keel_di::Dispose;
use keel_log::trace;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks entity entries for one context.
///
/// Entries are keyed by object identity. Tracked entries are owned by the
/// tracker; `Detached` ones live only as long as some [`EntityEntry`] handle
/// does, so looking up an untracked object never keeps it alive. While any
/// handle exists, asking again for the same object yields the same entry.
/// The entry map lock is never held while listeners run.
///
/// [`EntityEntry`]: super::EntityEntry
pub struct StateManager {
    model: OnceCell<Arc<Model>>,
    entries: Mutex<EntryMap>,
    sequence: AtomicU64,
    listeners: Vec<Arc<dyn EntityStateListener>>,
    fixer: Arc<NavigationFixer>,
    value_generator: Arc<dyn ValueGenerator>,
    diagnostics: Arc<DiagnosticsLogger>,
    disposed: AtomicBool,
}

impl StateManager {
    /// Create a tracker notifying `listeners` of state changes.
    pub fn new(
        listeners: Vec<Arc<dyn EntityStateListener>>,
        fixer: Arc<NavigationFixer>,
        value_generator: Arc<dyn ValueGenerator>,
        diagnostics: Arc<DiagnosticsLogger>,
    ) -> Self {
        Self {
            model: OnceCell::new(),
            entries: Mutex::new(EntryMap::default()),
            sequence: AtomicU64::new(1),
            listeners,
            fixer,
            value_generator,
            diagnostics,
            disposed: AtomicBool::new(false),
        }
    }

    /// Bind the model entities are tracked against. Only the first call has
    /// an effect.
    pub fn bind_model(&self, model: Arc<Model>) {
        let _ = self.model.set(model);
    }

    /// Bound model.
    pub fn model(&self) -> ContextResult<&Arc<Model>> {
        self.model.get().ok_or(ContextError::NoProviderConfigured)
    }

    /// Metadata for `entity_type`.
    pub fn metadata(&self, entity_type: &str) -> ContextResult<&EntityMetadata> {
        self.model()?
            .metadata(entity_type)
            .ok_or_else(|| ContextError::EntityTypeNotFound(entity_type.to_string()))
    }

    /// Fails once the owning context has been disposed.
    pub fn ensure_live(&self) -> ContextResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ContextError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn fixer(&self) -> &Arc<NavigationFixer> {
        &self.fixer
    }

    /// Diagnostics of the owning context.
    pub fn diagnostics(&self) -> &Arc<DiagnosticsLogger> {
        &self.diagnostics
    }

    /// Entry for `entity` if one exists, tracked or not.
    pub fn try_get_entry(&self, entity: &EntityRef) -> Option<Arc<InternalEntry>> {
        self.entries.lock().get(identity(entity))
    }

    /// Entry for `entity`, created `Detached` if none exists. A new entry is
    /// held weakly until it is put in a tracked state.
    pub fn get_or_create_entry(&self, entity: &EntityRef) -> ContextResult<Arc<InternalEntry>> {
        self.ensure_live()?;
        self.metadata(entity.entity_type())?;
        let mut entries = self.entries.lock();
        let key = identity(entity);
        if let Some(entry) = entries.get(key) {
            return Ok(entry);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(InternalEntry::new(entity.clone(), sequence));
        entries.release(key, &entry);
        Ok(entry)
    }

    /// State of `entity`; `Detached` when it has no entry.
    pub fn state_of(&self, entity: &EntityRef) -> EntityState {
        self.try_get_entry(entity)
            .map_or(EntityState::Detached, |entry| entry.state())
    }

    /// Whether `entity` is tracked.
    pub fn is_tracked(&self, entity: &EntityRef) -> bool {
        self.state_of(entity) != EntityState::Detached
    }

    /// Tracked entries in the order they were first seen.
    pub fn entries(&self) -> Vec<Arc<InternalEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .lock()
            .tracked
            .values()
            .filter(|entry| entry.is_tracked())
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.sequence());
        entries
    }

    /// Tracked entries of `entity_type`.
    pub fn entries_of_type(&self, entity_type: &str) -> Vec<Arc<InternalEntry>> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.entity_type() == entity_type)
            .collect()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .tracked
            .values()
            .filter(|entry| entry.is_tracked())
            .count()
    }

    /// Number of detached entries still reachable through a live handle.
    pub fn detached_len(&self) -> usize {
        self.entries.lock().live_detached()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any tracked entity has a pending change.
    pub fn has_changes(&self) -> bool {
        self.entries
            .lock()
            .tracked
            .values()
            .any(|entry| entry.state().has_pending_change())
    }

    /// Put one entry in `state` without traversing its graph.
    pub fn set_entry_state(&self, entry: &Arc<InternalEntry>, state: EntityState) -> ContextResult<()> {
        self.apply_states(vec![(entry.clone(), state)])
    }

    /// Apply `op` to `root` and everything reachable from it.
    pub fn track_graph(&self, root: &EntityRef, op: GraphOperation) -> ContextResult<Arc<InternalEntry>> {
        self.ensure_live()?;
        let plan = graph::plan(self, root, op)?;
        let root_entry = self.get_or_create_entry(root)?;
        let changes = self.entries_for(plan)?;
        self.apply_states(changes)?;
        Ok(root_entry)
    }

    /// [`track_graph`](Self::track_graph), generating keys asynchronously.
    pub async fn track_graph_async(
        &self,
        root: &EntityRef,
        op: GraphOperation,
    ) -> ContextResult<Arc<InternalEntry>> {
        self.ensure_live()?;
        let plan = graph::plan(self, root, op)?;
        for (entity, state) in &plan {
            if *state == EntityState::Added {
                let key = self.metadata(entity.entity_type())?.key().clone();
                if key.is_sentinel(&entity.get(key.property())) {
                    let value = self
                        .value_generator
                        .next_async(entity.entity_type(), key.property())
                        .await?;
                    entity.set(key.property(), value);
                }
            }
        }
        let root_entry = self.get_or_create_entry(root)?;
        let changes = self.entries_for(plan)?;
        self.apply_states(changes)?;
        Ok(root_entry)
    }

    fn entries_for(
        &self,
        plan: Vec<(EntityRef, EntityState)>,
    ) -> ContextResult<Vec<(Arc<InternalEntry>, EntityState)>> {
        plan.into_iter()
            .map(|(entity, state)| Ok((self.get_or_create_entry(&entity)?, state)))
            .collect()
    }

    /// Store every state first, then notify listeners in order, so fix-up
    /// sees the whole batch as tracked.
    fn apply_states(&self, changes: Vec<(Arc<InternalEntry>, EntityState)>) -> ContextResult<()> {
        self.ensure_live()?;
        let mut applied = Vec::with_capacity(changes.len());
        for (entry, state) in changes {
            if state == EntityState::Added {
                self.generate_key(&entry)?;
            }
            let old = entry.replace_state(state);
            self.entries.lock().file(&entry, state);
            trace!(
                "{} entry #{}: {} -> {}",
                entry.entity_type(),
                entry.sequence(),
                old,
                state
            );
            applied.push((entry, old));
        }
        for (entry, old) in &applied {
            for listener in &self.listeners {
                listener.state_changed(self, entry, *old)?;
            }
        }
        Ok(())
    }

    fn generate_key(&self, entry: &InternalEntry) -> ContextResult<()> {
        let key = self.metadata(entry.entity_type())?.key();
        let entity = entry.entity();
        if key.is_sentinel(&entity.get(key.property())) {
            let value = self
                .value_generator
                .next(entry.entity_type(), key.property())?;
            entity.set(key.property(), value);
        }
        Ok(())
    }

    /// Pending changes in tracking order.
    pub fn pending_changes(&self) -> ContextResult<Vec<PendingChange>> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.state().has_pending_change())
            .map(|entry| {
                let key = self.metadata(entry.entity_type())?.key().property().to_string();
                let entity = entry.entity().clone();
                Ok(PendingChange {
                    entity_type: entry.entity_type().to_string(),
                    state: entry.state(),
                    key: entity.get(&key),
                    values: entity.properties(),
                    entity,
                })
            })
            .collect()
    }

    /// Mark every saved entity as matching the store: added and modified
    /// entities become `Unchanged`, deleted ones `Detached`.
    pub fn accept_all_changes(&self) -> ContextResult<()> {
        let changes: Vec<_> = self
            .entries()
            .into_iter()
            .filter_map(|entry| match entry.state() {
                EntityState::Added | EntityState::Modified => Some((entry, EntityState::Unchanged)),
                EntityState::Deleted => Some((entry, EntityState::Detached)),
                _ => None,
            })
            .collect();
        self.apply_states(changes)
    }

    /// Detach and forget every entry without notifying listeners.
    pub fn clear(&self) {
        let entries = self.entries.lock().drain();
        for entry in &entries {
            entry.replace_state(EntityState::Detached);
        }
        trace!("Cleared {} tracker entries", entries.len());
    }
}

/// Tracked entries held strongly, detached ones weakly.
#[derive(Default)]
struct EntryMap {
    tracked: HashMap<usize, Arc<InternalEntry>>,
    detached: HashMap<usize, Weak<InternalEntry>>,
}

impl EntryMap {
    fn get(&self, key: usize) -> Option<Arc<InternalEntry>> {
        self.tracked
            .get(&key)
            .cloned()
            .or_else(|| self.detached.get(&key).and_then(Weak::upgrade))
    }

    /// Move `entry` to the side matching `state`.
    fn file(&mut self, entry: &Arc<InternalEntry>, state: EntityState) {
        let key = identity(entry.entity());
        if state == EntityState::Detached {
            if self.tracked.remove(&key).is_some() {
                self.release(key, entry);
            }
        } else {
            self.detached.remove(&key);
            self.tracked.entry(key).or_insert_with(|| entry.clone());
        }
    }

    /// Hold `entry` weakly, dropping slots whose entries are gone.
    fn release(&mut self, key: usize, entry: &Arc<InternalEntry>) {
        self.detached.retain(|_, weak| weak.strong_count() > 0);
        self.detached.insert(key, Arc::downgrade(entry));
    }

    fn live_detached(&self) -> usize {
        self.detached
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn drain(&mut self) -> Vec<Arc<InternalEntry>> {
        let mut entries: Vec<_> = self.tracked.drain().map(|(_, entry)| entry).collect();
        entries.extend(self.detached.drain().filter_map(|(_, weak)| weak.upgrade()));
        entries
    }
}

impl Dispose for StateManager {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.clear();
        }
    }
}
