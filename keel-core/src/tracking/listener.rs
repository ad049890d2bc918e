//! State change notifications.

use super::{EntityState, InternalEntry, StateManager};
use crate::diagnostics::DiagnosticsLogger;
use crate::error::ContextResult;
use crate::metadata::MetadataProvider;
use crate::options::CoreEventId;
use std::sync::Arc;

/// Notified after an entry's state is set.
///
/// Registered as a multi-registration in the internal provider; every
/// registration is notified, in registration order.
pub trait EntityStateListener: Send + Sync {
    /// `entry` went from `old` to its current state. Also called when an
    /// explicit state assignment leaves the state unchanged.
    fn state_changed(
        &self,
        manager: &StateManager,
        entry: &Arc<InternalEntry>,
        old: EntityState,
    ) -> ContextResult<()>;
}

/// Writes tracking events to the change-tracking logger.
pub struct StateChangeLogger {
    diagnostics: Arc<DiagnosticsLogger>,
}

impl StateChangeLogger {
    /// Create a logger writing through `diagnostics`.
    pub fn new(diagnostics: Arc<DiagnosticsLogger>) -> Self {
        Self { diagnostics }
    }
}

impl EntityStateListener for StateChangeLogger {
    fn state_changed(
        &self,
        manager: &StateManager,
        entry: &Arc<InternalEntry>,
        old: EntityState,
    ) -> ContextResult<()> {
        let new = entry.state();
        let event = if old == EntityState::Detached && new != EntityState::Detached {
            CoreEventId::StartedTracking
        } else {
            CoreEventId::StateChanged
        };

        self.diagnostics.log(event, || {
            let subject = if self.diagnostics.sensitive_data_logging_enabled() {
                let key = manager
                    .model()
                    .ok()
                    .and_then(|model| model.metadata(entry.entity_type()))
                    .map(|m| entry.entity().get(m.key().property()))
                    .unwrap_or_default();
                format!("'{}' entity with key '{}'", entry.entity_type(), key)
            } else {
                format!("'{}' entity", entry.entity_type())
            };
            match event {
                CoreEventId::StartedTracking => format!("{} started tracking as {}", subject, new),
                _ => format!("{} changed state from {} to {}", subject, old, new),
            }
        })
    }
}
