//! Graph traversal for the public tracking operations.

use super::{EntityState, GraphOperation, StateManager};
use crate::entity::{EntityRef, identity};
use crate::error::ContextResult;
use crate::metadata::MetadataProvider;
use std::collections::{HashSet, VecDeque};

/// How a node was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    Root,
    /// Through a dependent's reference navigation.
    Principal,
    /// Through a principal's collection navigation; `cascade` when that
    /// principal is being removed.
    Dependent { cascade: bool },
}

/// Decide the state of every entity `op` reaches from `root`.
///
/// The root always gets `op`'s state. Reachable entities that are not
/// tracked get the same rule, except that `Remove` attaches the entities it
/// reaches unless it cascades to them. Tracked entities keep their state and
/// are not expanded, unless a removal cascades to them. Every entity is
/// visited at most once.
pub(crate) fn plan(
    manager: &StateManager,
    root: &EntityRef,
    op: GraphOperation,
) -> ContextResult<Vec<(EntityRef, EntityState)>> {
    let model = manager.model()?;
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(root.clone(), Reach::Root)]);
    let mut plan = Vec::new();

    while let Some((entity, reach)) = queue.pop_front() {
        if !visited.insert(identity(&entity)) {
            continue;
        }

        let metadata = manager.metadata(entity.entity_type())?;
        let current = manager.state_of(&entity);
        let key_unset = metadata
            .key()
            .is_sentinel(&entity.get(metadata.key().property()));

        let removing = match reach {
            Reach::Root => op == GraphOperation::Remove,
            Reach::Dependent { cascade } => cascade,
            Reach::Principal => false,
        };

        let target = if removing {
            GraphOperation::Remove.target_state(current, key_unset)
        } else if reach == Reach::Root {
            op.target_state(current, key_unset)
        } else if current != EntityState::Detached {
            continue;
        } else if op == GraphOperation::Remove {
            GraphOperation::Attach.target_state(current, key_unset)
        } else {
            op.target_state(current, key_unset)
        };
        plan.push((entity.clone(), target));

        for fk in metadata.foreign_keys() {
            if let Some(navigation) = fk.reference()
                && let Some(principal) = entity.reference(navigation)
            {
                queue.push_back((principal, Reach::Principal));
            }
        }
        for fk in model.referencing_foreign_keys(entity.entity_type()) {
            if let Some(navigation) = fk.collection() {
                for dependent in entity.collection(navigation) {
                    queue.push_back((dependent, Reach::Dependent { cascade: removing }));
                }
            }
        }
    }

    Ok(plan)
}
