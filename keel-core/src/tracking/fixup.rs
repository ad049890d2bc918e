//! Relationship fix-up between tracked principals and dependents.
//!
//! A dependent entering tracking picks its principal in this order:
//!
//! 1. the tracked principal its reference navigation points at;
//! 2. a tracked principal whose collection already contains it;
//! 3. a tracked principal whose key equals its foreign key value.
//!
//! A principal entering tracking claims the tracked dependents that are in
//! its collection, that reference it, or that carry its key and reference
//! nothing. Linking always rewrites the dependent's foreign key, its
//! reference, and collection membership on both the new and the old
//! principal, so whichever side is tracked last settles the relationship.

use super::{EntityState, EntityStateListener, InternalEntry, StateManager};
use crate::entity::{EntityRef, Value};
use crate::error::ContextResult;
use crate::metadata::{ForeignKeyMetadata, MetadataProvider};
use crate::options::CoreEventId;
use keel_log::debug;
use std::sync::Arc;

/// Keeps foreign keys and navigations of tracked entities consistent.
#[derive(Debug, Default)]
pub struct NavigationFixer;

impl NavigationFixer {
    /// Create a fixer.
    pub fn new() -> Self {
        Self
    }

    /// Make `dependent` point at `principal` through `fk`.
    pub fn link(
        &self,
        manager: &StateManager,
        fk: &ForeignKeyMetadata,
        principal: &EntityRef,
        dependent: &EntityRef,
    ) -> ContextResult<()> {
        let principal_key = manager.metadata(principal.entity_type())?.key().property();
        let key = principal.get(principal_key);
        dependent.set(fk.property(), key.clone());

        if let Some(navigation) = fk.reference() {
            if let Some(previous) = dependent.reference(navigation)
                && !Arc::ptr_eq(&previous, principal)
                && let Some(collection) = fk.collection()
            {
                previous.remove_from_collection(collection, dependent);
            }
            dependent.set_reference(navigation, Some(principal));
        }

        if let Some(collection) = fk.collection() {
            for other in manager.entries_of_type(fk.principal()) {
                if !Arc::ptr_eq(other.entity(), principal) {
                    other.entity().remove_from_collection(collection, dependent);
                }
            }
            principal.add_to_collection(collection, dependent);
        }

        debug!(
            "Fixed up {}.{} to {} principal",
            fk.dependent(),
            fk.property(),
            fk.principal()
        );
        manager.diagnostics().log(CoreEventId::ForeignKeyFixedUp, || {
            if manager.diagnostics().sensitive_data_logging_enabled() {
                format!(
                    "'{}' foreign key '{}' set to '{}' to match its '{}' principal",
                    fk.dependent(),
                    fk.property(),
                    key,
                    fk.principal()
                )
            } else {
                format!(
                    "'{}' foreign key '{}' fixed up to its '{}' principal",
                    fk.dependent(),
                    fk.property(),
                    fk.principal()
                )
            }
        })
    }

    /// Take `dependent` out of every principal collection of `fk`.
    fn remove_from_principals(
        &self,
        manager: &StateManager,
        fk: &ForeignKeyMetadata,
        dependent: &EntityRef,
    ) {
        let Some(collection) = fk.collection() else {
            return;
        };
        if let Some(navigation) = fk.reference()
            && let Some(previous) = dependent.reference(navigation)
        {
            previous.remove_from_collection(collection, dependent);
        }
        for principal in manager.entries_of_type(fk.principal()) {
            principal.entity().remove_from_collection(collection, dependent);
        }
    }

    /// Detach `dependent` from its principal through `fk`, clearing the
    /// reference and leaving the foreign key as it is.
    fn unlink(&self, manager: &StateManager, fk: &ForeignKeyMetadata, dependent: &EntityRef) {
        self.remove_from_principals(manager, fk, dependent);
        if let Some(navigation) = fk.reference() {
            dependent.set_reference(navigation, None);
        }
    }

    fn find_principal(
        &self,
        manager: &StateManager,
        fk: &ForeignKeyMetadata,
        dependent: &EntityRef,
    ) -> ContextResult<Option<EntityRef>> {
        if let Some(navigation) = fk.reference()
            && let Some(principal) = dependent.reference(navigation)
            && manager.is_tracked(&principal)
        {
            return Ok(Some(principal));
        }

        let candidates = manager.entries_of_type(fk.principal());
        if let Some(collection) = fk.collection()
            && let Some(owner) = candidates
                .iter()
                .find(|p| p.entity().collection_contains(collection, dependent))
        {
            return Ok(Some(owner.entity().clone()));
        }

        self.principal_with_key(manager, fk, &dependent.get(fk.property()), &candidates)
    }

    fn principal_with_key(
        &self,
        manager: &StateManager,
        fk: &ForeignKeyMetadata,
        value: &Value,
        candidates: &[Arc<InternalEntry>],
    ) -> ContextResult<Option<EntityRef>> {
        if value.is_null() {
            return Ok(None);
        }
        let key = manager.metadata(fk.principal())?.key().property();
        Ok(candidates
            .iter()
            .find(|p| p.entity().get(key) == *value)
            .map(|p| p.entity().clone()))
    }

    fn fix_as_dependent(&self, manager: &StateManager, entry: &InternalEntry) -> ContextResult<()> {
        let dependent = entry.entity();
        for fk in manager.metadata(entry.entity_type())?.foreign_keys() {
            if let Some(principal) = self.find_principal(manager, fk, dependent)? {
                self.link(manager, fk, &principal, dependent)?;
            }
        }
        Ok(())
    }

    fn fix_as_principal(&self, manager: &StateManager, entry: &InternalEntry) -> ContextResult<()> {
        let principal = entry.entity();
        let model = manager.model()?;
        let key = principal.get(manager.metadata(entry.entity_type())?.key().property());

        for fk in model.referencing_foreign_keys(entry.entity_type()) {
            for dependent in manager.entries_of_type(fk.dependent()) {
                let dependent = dependent.entity();
                let in_collection = fk
                    .collection()
                    .is_some_and(|c| principal.collection_contains(c, dependent));
                let reference = fk.reference().and_then(|r| dependent.reference(r));
                let references_this = reference
                    .as_ref()
                    .is_some_and(|r| Arc::ptr_eq(r, principal));
                let matches_key = reference.is_none()
                    && !key.is_null()
                    && dependent.get(fk.property()) == key;

                if in_collection || references_this || matches_key {
                    self.link(manager, fk, principal, dependent)?;
                }
            }
        }
        Ok(())
    }

    fn detached(&self, manager: &StateManager, entry: &InternalEntry) -> ContextResult<()> {
        for fk in manager.metadata(entry.entity_type())?.foreign_keys() {
            self.remove_from_principals(manager, fk, entry.entity());
        }
        Ok(())
    }

    /// The foreign key of tracked `entry` was set explicitly.
    pub fn foreign_key_changed(
        &self,
        manager: &StateManager,
        entry: &InternalEntry,
        fk: &ForeignKeyMetadata,
    ) -> ContextResult<()> {
        let dependent = entry.entity();
        let value = dependent.get(fk.property());
        let candidates = manager.entries_of_type(fk.principal());
        match self.principal_with_key(manager, fk, &value, &candidates)? {
            Some(principal) => self.link(manager, fk, &principal, dependent),
            None => {
                self.unlink(manager, fk, dependent);
                Ok(())
            }
        }
    }

    /// The reference navigation of tracked `entry` was set explicitly.
    pub fn reference_changed(
        &self,
        manager: &StateManager,
        entry: &InternalEntry,
        fk: &ForeignKeyMetadata,
        principal: Option<&EntityRef>,
    ) -> ContextResult<()> {
        let dependent = entry.entity();
        match principal {
            Some(principal) => self.link(manager, fk, principal, dependent),
            None => {
                self.unlink(manager, fk, dependent);
                dependent.set(fk.property(), Value::Null);
                Ok(())
            }
        }
    }
}

impl EntityStateListener for NavigationFixer {
    fn state_changed(
        &self,
        manager: &StateManager,
        entry: &Arc<InternalEntry>,
        _old: EntityState,
    ) -> ContextResult<()> {
        if entry.state() == EntityState::Detached {
            return self.detached(manager, entry);
        }
        self.fix_as_dependent(manager, entry)?;
        self.fix_as_principal(manager, entry)
    }
}
