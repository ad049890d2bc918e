//! Categorised loggers handed out by a factory.
//!
//! A unit of work never writes to stderr directly; it asks the registered
//! [`LoggerFactory`] for a [`Logger`] per category. The console factory
//! forwards to the global keel output, the list factory records entries so
//! tests can assert on them.

use crate::Level;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sink for one log category.
pub trait Logger: Send + Sync {
    /// Whether `level` would be recorded.
    fn is_enabled(&self, level: Level) -> bool;

    /// Record a message.
    fn log(&self, level: Level, message: &str);
}

/// Creates loggers by category.
pub trait LoggerFactory: Send + Sync {
    /// Logger for `category`.
    fn create_logger(&self, category: &str) -> Arc<dyn Logger>;

    /// Release the factory. Loggers created afterwards record nothing.
    fn dispose(&self) {}

    /// Whether [`dispose`](Self::dispose) has run.
    fn is_disposed(&self) -> bool {
        false
    }
}

// ============================================================================
// Console
// ============================================================================

/// Factory whose loggers write through the global keel output.
#[derive(Debug, Default)]
pub struct ConsoleLoggerFactory {
    disposed: AtomicBool,
}

impl ConsoleLoggerFactory {
    /// Create a console factory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoggerFactory for ConsoleLoggerFactory {
    fn create_logger(&self, category: &str) -> Arc<dyn Logger> {
        Arc::new(ConsoleLogger {
            category: category.to_string(),
            muted: self.is_disposed(),
        })
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Logger created by [`ConsoleLoggerFactory`].
#[derive(Debug)]
pub struct ConsoleLogger {
    category: String,
    muted: bool,
}

impl Logger for ConsoleLogger {
    fn is_enabled(&self, level: Level) -> bool {
        !self.muted && crate::is_level_enabled(level)
    }

    fn log(&self, level: Level, message: &str) {
        if self.is_enabled(level) {
            crate::log(level, &self.category, message);
        }
    }
}

// ============================================================================
// In-memory list
// ============================================================================

/// A captured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Level the entry was logged at
    pub level: Level,
    /// Logger category
    pub category: String,
    /// Rendered message
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.level, self.category, self.message)
    }
}

/// Factory that records every entry in memory.
///
/// ```rust
/// use keel_log::{Level, ListLoggerFactory, LoggerFactory};
///
/// let factory = ListLoggerFactory::new();
/// factory.create_logger("keel::update").log(Level::Warn, "slow save");
///
/// assert_eq!(factory.entries()[0].message, "slow save");
/// ```
#[derive(Debug, Clone)]
pub struct ListLoggerFactory {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    min_level: Level,
    disposed: Arc<AtomicBool>,
}

impl Default for ListLoggerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ListLoggerFactory {
    /// Record everything from `Trace` up.
    pub fn new() -> Self {
        Self::with_level(Level::Trace)
    }

    /// Record entries at `min_level` or above.
    pub fn with_level(min_level: Level) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            min_level,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Snapshot of recorded entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Recorded entries for `category`.
    pub fn entries_for(&self, category: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    /// Whether any entry's message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.message.contains(needle))
    }

    /// Drop recorded entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl LoggerFactory for ListLoggerFactory {
    fn create_logger(&self, category: &str) -> Arc<dyn Logger> {
        Arc::new(ListLogger {
            category: category.to_string(),
            min_level: self.min_level,
            entries: self.entries.clone(),
            disposed: self.disposed.clone(),
        })
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

struct ListLogger {
    category: String,
    min_level: Level,
    entries: Arc<Mutex<Vec<LogEntry>>>,
    disposed: Arc<AtomicBool>,
}

impl Logger for ListLogger {
    fn is_enabled(&self, level: Level) -> bool {
        level != Level::Off && level >= self.min_level && !self.disposed.load(Ordering::Acquire)
    }

    fn log(&self, level: Level, message: &str) {
        if self.is_enabled(level) {
            self.entries.lock().push(LogEntry {
                level,
                category: self.category.clone(),
                message: message.to_string(),
            });
        }
    }
}
