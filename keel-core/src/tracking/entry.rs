//! Tracker entries.

use super::{EntityState, StateManager};
use crate::entity::{EntityRef, Value};
use crate::error::{ContextError, ContextResult};
use crate::metadata::MetadataProvider;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The tracker's record for one entity object.
///
/// There is at most one live `InternalEntry` per object in a tracker; every
/// [`EntityEntry`] for the object points at it.
pub struct InternalEntry {
    entity: EntityRef,
    state: Mutex<EntityState>,
    sequence: u64,
}

impl InternalEntry {
    pub(crate) fn new(entity: EntityRef, sequence: u64) -> Self {
        Self {
            entity,
            state: Mutex::new(EntityState::Detached),
            sequence,
        }
    }

    /// Tracked entity.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        self.entity.entity_type()
    }

    /// Current state.
    pub fn state(&self) -> EntityState {
        *self.state.lock()
    }

    /// Order in which the entry was created.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the entity is tracked (not `Detached`).
    pub fn is_tracked(&self) -> bool {
        self.state() != EntityState::Detached
    }

    /// Store `state` and return the previous one. Listeners are not notified.
    pub(crate) fn replace_state(&self, state: EntityState) -> EntityState {
        std::mem::replace(&mut *self.state.lock(), state)
    }
}

impl fmt::Debug for InternalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalEntry")
            .field("entity_type", &self.entity_type())
            .field("state", &self.state())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Handle onto a tracked entity's entry.
///
/// Returned by the context's tracking operations. Changing foreign keys or
/// navigations through the entry runs relationship fix-up; changing the
/// entity object directly does not.
#[derive(Clone)]
pub struct EntityEntry {
    internal: Arc<InternalEntry>,
    manager: Arc<StateManager>,
}

impl EntityEntry {
    pub(crate) fn new(internal: Arc<InternalEntry>, manager: Arc<StateManager>) -> Self {
        Self { internal, manager }
    }

    /// Tracked entity.
    pub fn entity(&self) -> &EntityRef {
        self.internal.entity()
    }

    /// Shared entry storage.
    pub fn internal(&self) -> &Arc<InternalEntry> {
        &self.internal
    }

    /// Whether both handles point at the same entry.
    pub fn same_entry(&self, other: &EntityEntry) -> bool {
        Arc::ptr_eq(&self.internal, &other.internal)
    }

    /// Current state.
    pub fn state(&self) -> EntityState {
        self.internal.state()
    }

    /// Put only this entity in `state`. Related entities are not traversed,
    /// but relationship fix-up runs.
    pub fn set_state(&self, state: EntityState) -> ContextResult<()> {
        self.manager.set_entry_state(&self.internal, state)
    }

    /// Property value.
    pub fn property(&self, name: &str) -> Value {
        self.entity().get(name)
    }

    /// Set a foreign key. The new value is authoritative: navigations are
    /// rewritten to the tracked principal with that key, or cleared.
    pub fn set_foreign_key(&self, property: &str, value: impl Into<Value>) -> ContextResult<()> {
        self.manager.ensure_live()?;
        let metadata = self.manager.metadata(self.internal.entity_type())?;
        let fk = metadata
            .foreign_key(property)
            .ok_or_else(|| ContextError::UnknownForeignKey {
                entity_type: metadata.name().to_string(),
                property: property.to_string(),
            })?
            .clone();

        self.entity().set(property, value);
        if !self.internal.is_tracked() {
            return Ok(());
        }
        self.manager
            .fixer()
            .foreign_key_changed(&self.manager, &self.internal, &fk)?;
        self.mark_modified()
    }

    /// Point a reference navigation at `principal`, or clear it. The foreign
    /// key is rewritten to match.
    pub fn set_reference(&self, navigation: &str, principal: Option<&EntityRef>) -> ContextResult<()> {
        self.manager.ensure_live()?;
        let metadata = self.manager.metadata(self.internal.entity_type())?;
        let fk = metadata
            .foreign_key_for_reference(navigation)
            .ok_or_else(|| ContextError::UnknownNavigation {
                entity_type: metadata.name().to_string(),
                navigation: navigation.to_string(),
            })?
            .clone();

        if !self.internal.is_tracked() {
            self.entity().set_reference(navigation, principal);
            return Ok(());
        }
        self.manager
            .fixer()
            .reference_changed(&self.manager, &self.internal, &fk, principal)?;
        self.mark_modified()
    }

    /// Add `dependent` to a collection navigation of this entity. When both
    /// are tracked the dependent's foreign key and reference follow.
    pub fn add_to_collection(&self, navigation: &str, dependent: &EntityRef) -> ContextResult<()> {
        self.manager.ensure_live()?;
        let fk = self
            .manager
            .model()?
            .referencing_foreign_keys(self.internal.entity_type())
            .into_iter()
            .find(|fk| fk.collection() == Some(navigation))
            .cloned()
            .ok_or_else(|| ContextError::UnknownNavigation {
                entity_type: self.internal.entity_type().to_string(),
                navigation: navigation.to_string(),
            })?;

        self.entity().add_to_collection(navigation, dependent);
        if !self.internal.is_tracked() {
            return Ok(());
        }
        if let Some(dependent_entry) = self.manager.try_get_entry(dependent)
            && dependent_entry.is_tracked()
        {
            self.manager
                .fixer()
                .link(&self.manager, &fk, self.entity(), dependent)?;
            if dependent_entry.state() == EntityState::Unchanged {
                self.manager
                    .set_entry_state(&dependent_entry, EntityState::Modified)?;
            }
        }
        Ok(())
    }

    fn mark_modified(&self) -> ContextResult<()> {
        if self.internal.state() == EntityState::Unchanged {
            self.manager
                .set_entry_state(&self.internal, EntityState::Modified)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityEntry").field(&self.internal).finish()
    }
}
