//! Context diagnostics routed through the configured logger factory.

use crate::error::{ContextError, ContextResult};
use crate::options::{ContextOptions, CoreEventId, WarningBehavior};
use keel_log::{Logger, LoggerFactory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Raises [`CoreEventId`] events for one context.
///
/// Each event goes through the context's warnings configuration: it is
/// logged to its category's logger, dropped, or turned into
/// [`ContextError::WarningAsError`].
pub struct DiagnosticsLogger {
    factory: Arc<dyn LoggerFactory>,
    options: Arc<ContextOptions>,
    loggers: Mutex<HashMap<&'static str, Arc<dyn Logger>>>,
}

impl DiagnosticsLogger {
    /// Create a diagnostics logger for a context configured with `options`.
    pub fn new(factory: Arc<dyn LoggerFactory>, options: Arc<ContextOptions>) -> Self {
        Self {
            factory,
            options,
            loggers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether key values may be logged.
    pub fn sensitive_data_logging_enabled(&self) -> bool {
        self.options.sensitive_data_logging()
    }

    /// Logger factory in use.
    pub fn logger_factory(&self) -> &Arc<dyn LoggerFactory> {
        &self.factory
    }

    /// Raise `event`. `message` is only rendered when it is needed.
    pub fn log(&self, event: CoreEventId, message: impl FnOnce() -> String) -> ContextResult<()> {
        match self.options.warnings().behavior_for(event) {
            WarningBehavior::Ignore => Ok(()),
            WarningBehavior::Throw => Err(ContextError::WarningAsError {
                event: event.name(),
                message: message(),
            }),
            WarningBehavior::Log => {
                let logger = self.logger(event.category());
                if logger.is_enabled(event.level()) {
                    logger.log(event.level(), &message());
                }
                Ok(())
            }
        }
    }

    fn logger(&self, category: &'static str) -> Arc<dyn Logger> {
        self.loggers
            .lock()
            .entry(category)
            .or_insert_with(|| self.factory.create_logger(category))
            .clone()
    }
}
