//! Keel Logging
//!
//! Structured, environment-controlled logging shared by every keel crate,
//! plus the [`LoggerFactory`] collaborator a unit of work logs through.
//!
//! # Features
//!
//! - **Environment-controlled**: `KEEL_DEBUG=1` enables debug logging
//! - **Cheap when disabled**: macros check an atomic level before formatting
//! - **Multiple formats**: pretty, compact and JSON output
//! - **Pluggable sinks**: [`LoggerFactory`] implementations decide where
//!   categorised log entries go; [`ListLoggerFactory`] captures them for tests
//!
//! # Usage
//!
//! ```rust
//! use keel_log::{debug, info, warn, error, trace};
//!
//! debug!("Building service provider");
//! info!("Context initialized in {}ms", 3);
//! warn!("Pool exhausted, creating a new instance");
//! error!("Store rejected the change set");
//!
//! let scope = 7;
//! trace!(target: "keel::di", "Creating scope {}", scope);
//! ```
//!
//! # Environment Variables
//!
//! - `KEEL_DEBUG=1` - Enable debug logging
//! - `KEEL_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `KEEL_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `KEEL_LOG_COLOR=1|0` - Enable/disable colors
//! - `KEEL_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `KEEL_LOG_MODULE=1|0` - Include the log target

mod bridge;
mod factory;

pub use bridge::install_log_bridge;
pub use factory::*;

use once_cell::sync::Lazy;
use std::env;
use std::fmt;
use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Parse a level name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Off,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL.get(usize::from(value)).copied().unwrap_or(Level::Off)
    }

    #[cfg(feature = "color")]
    fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => "TRACE".magenta(),
            Level::Debug => "DEBUG".blue(),
            Level::Info => "INFO".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERROR".red().bold(),
            Level::Off => "OFF".white(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-field human readable format
    Pretty,
    /// Single-letter level, short timestamp
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Global Configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static CONFIG: Lazy<LogConfig> = Lazy::new(|| {
    let config = LogConfig::from_env();
    DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
    LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
    config
});

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the log target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Pretty,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Self {
        let debug = env_flag("KEEL_DEBUG").unwrap_or(false);

        let level = env::var("KEEL_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = env::var("KEEL_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Pretty);

        let color = env_flag("KEEL_LOG_COLOR").unwrap_or_else(|| {
            env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
        });

        Self {
            debug,
            level,
            format,
            color,
            timestamps: env_flag("KEEL_LOG_TIMESTAMPS").unwrap_or(true),
            module_path: env_flag("KEEL_LOG_MODULE").unwrap_or(true),
        }
    }

    /// Set the minimum level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable timestamps.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize the logging system eagerly.
///
/// The first log macro that passes its level check does this implicitly.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Check if debug logging is enabled.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Check if a log level is enabled.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set the minimum level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Enable or disable debug mode at runtime.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Log Output
// ============================================================================

/// Write a record to stderr using the global configuration.
///
/// Debug records pass while debug mode is on even above the configured level.
pub fn log(level: Level, target: &str, message: &str) {
    let debug_mode = level == Level::Debug && is_debug_enabled();
    if !debug_mode && !is_level_enabled(level) {
        return;
    }
    let record = render(config(), level, target, message);
    let _ = writeln!(std::io::stderr().lock(), "{}", record);
}

#[doc(hidden)]
pub fn log_args(level: Level, target: &str, args: fmt::Arguments<'_>) {
    match args.as_str() {
        Some(message) => log(level, target, message),
        None => log(level, target, &args.to_string()),
    }
}

/// Render one record according to `config`.
pub fn render(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    match config.format {
        Format::Pretty => render_pretty(config, level, target, message),
        Format::Compact => render_compact(config, level, target, message),
        Format::Json => render_json(level, target, message),
    }
}

fn render_pretty(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    let mut out = String::new();

    if config.timestamps {
        out.push_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
    }

    #[cfg(feature = "color")]
    let level_name = if config.color {
        level.colored().to_string()
    } else {
        level.as_str().to_string()
    };
    #[cfg(not(feature = "color"))]
    let level_name = level.as_str().to_string();
    out.push_str(&format!("{:5} ", level_name));

    if config.module_path && !target.is_empty() {
        out.push_str(&format!("[{}] ", target));
    }

    out.push_str(message);
    out
}

fn render_compact(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    let mut out = String::new();

    if config.timestamps {
        out.push_str(&chrono::Local::now().format("%H:%M:%S ").to_string());
    }

    out.push(level.as_str().chars().next().unwrap_or('?'));
    out.push(' ');

    if config.module_path && !target.is_empty() {
        out.push_str(target);
        out.push_str(": ");
    }

    out.push_str(message);
    out
}

#[cfg(feature = "json")]
fn render_json(level: Level, target: &str, message: &str) -> String {
    serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": level.as_str(),
        "target": target,
        "message": message,
    })
    .to_string()
}

#[cfg(not(feature = "json"))]
fn render_json(level: Level, target: &str, message: &str) -> String {
    format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}"}}"#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        target.escape_default(),
        message.escape_default()
    )
}

// ============================================================================
// Macros
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($enabled:expr, $level:expr, target: $target:expr, $($arg:tt)+) => {
        if $enabled {
            $crate::log_args($level, $target, format_args!($($arg)+));
        }
    };
    ($enabled:expr, $level:expr, $($arg:tt)+) => {
        $crate::__log_at!($enabled, $level, target: module_path!(), $($arg)+)
    };
}

/// Log at [`Level::Trace`]. Only enabled when `KEEL_LOG_LEVEL=trace`.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        $crate::__log_at!($crate::is_level_enabled($crate::Level::Trace), $crate::Level::Trace, $($arg)+)
    };
}

/// Log at [`Level::Debug`], also enabled by `KEEL_DEBUG=1`.
///
/// ```rust
/// use keel_log::debug;
///
/// let key = "app::Mailer";
/// debug!("Resolving {}", key);
/// debug!(target: "keel::di", "Resolving {}", key);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::__log_at!(
            $crate::is_debug_enabled() || $crate::is_level_enabled($crate::Level::Debug),
            $crate::Level::Debug,
            $($arg)+
        )
    };
}

/// Log at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::__log_at!($crate::is_level_enabled($crate::Level::Info), $crate::Level::Info, $($arg)+)
    };
}

/// Log at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::__log_at!($crate::is_level_enabled($crate::Level::Warn), $crate::Level::Warn, $($arg)+)
    };
}

/// Log at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::__log_at!($crate::is_level_enabled($crate::Level::Error), $crate::Level::Error, $($arg)+)
    };
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Tracing compatibility layer.
    //!
    //! Builds a subscriber whose default filter follows `KEEL_LOG_LEVEL`.

    use super::*;

    /// Create a tracing subscriber that respects keel's configuration.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}

// ============================================================================
// Tests
// ============================================================================
