//! Route records from the `log` facade through keel's output.

use crate::Level;

struct LogBridge;

static BRIDGE: LogBridge = LogBridge;

fn map_level(level: log::Level) -> Level {
    match level {
        log::Level::Trace => Level::Trace,
        log::Level::Debug => Level::Debug,
        log::Level::Info => Level::Info,
        log::Level::Warn => Level::Warn,
        log::Level::Error => Level::Error,
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        crate::is_level_enabled(map_level(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        crate::log_args(map_level(record.level()), record.target(), *record.args());
    }

    fn flush(&self) {}
}

/// Install keel as the global `log` logger.
///
/// Fails if another logger was installed first.
pub fn install_log_bridge() -> Result<(), log::SetLoggerError> {
    crate::init();
    log::set_logger(&BRIDGE)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
