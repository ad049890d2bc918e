//! Entity states and the graph operations that assign them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    /// Not tracked
    #[default]
    Detached,
    /// Tracked, matches the store
    Unchanged,
    /// Tracked, to be inserted
    Added,
    /// Tracked, to be updated
    Modified,
    /// Tracked, to be deleted
    Deleted,
}

impl EntityState {
    /// Whether saving has work to do for this state.
    pub fn has_pending_change(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    /// State name.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public tracking operation applied to an entity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphOperation {
    /// Track as new
    Add,
    /// Track as existing
    Attach,
    /// Track as existing and changed
    Update,
    /// Track for deletion
    Remove,
}

impl GraphOperation {
    /// State an entity in `current` ends in when this operation targets it.
    ///
    /// `key_unset` is true when the entity's generated key still holds its
    /// sentinel value.
    pub fn target_state(self, current: EntityState, key_unset: bool) -> EntityState {
        match self {
            GraphOperation::Add => EntityState::Added,
            GraphOperation::Attach if key_unset => EntityState::Added,
            GraphOperation::Attach => EntityState::Unchanged,
            GraphOperation::Update if key_unset => EntityState::Added,
            GraphOperation::Update => EntityState::Modified,
            GraphOperation::Remove if current == EntityState::Added => EntityState::Detached,
            GraphOperation::Remove => EntityState::Deleted,
        }
    }
}

impl fmt::Display for GraphOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphOperation::Add => "Add",
            GraphOperation::Attach => "Attach",
            GraphOperation::Update => "Update",
            GraphOperation::Remove => "Remove",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityState::*;

    const ALL: [EntityState; 5] = [Detached, Unchanged, Added, Modified, Deleted];

    #[test]
    fn test_add_always_added() {
        for state in ALL {
            assert_eq!(GraphOperation::Add.target_state(state, false), Added);
        }
    }

    #[test]
    fn test_attach_and_update() {
        for state in ALL {
            assert_eq!(GraphOperation::Attach.target_state(state, false), Unchanged);
            assert_eq!(GraphOperation::Attach.target_state(state, true), Added);
            assert_eq!(GraphOperation::Update.target_state(state, false), Modified);
            assert_eq!(GraphOperation::Update.target_state(state, true), Added);
        }
    }

    #[test]
    fn test_remove() {
        assert_eq!(GraphOperation::Remove.target_state(Added, false), Detached);
        for state in [Detached, Unchanged, Modified, Deleted] {
            assert_eq!(GraphOperation::Remove.target_state(state, false), Deleted);
        }
    }

    #[test]
    fn test_pending_change() {
        assert!(Added.has_pending_change());
        assert!(!Unchanged.has_pending_change());
        assert!(!Detached.has_pending_change());
    }
}
