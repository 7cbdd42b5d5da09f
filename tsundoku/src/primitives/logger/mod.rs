use std::sync::{Arc, OnceLock};

/// Receives the engine's log lines on the app side.
///
/// ```rust
/// use tsundoku::primitives::logger::{LogLevel, Logger};
///
/// struct StdoutLogger;
///
/// impl Logger for StdoutLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## kotlin
///
/// ```kotlin
/// object TsundokuLogBridge : Logger {
///     override fun log(level: LogLevel, message: String) {
///         when (level) {
///             LogLevel.TRACE, LogLevel.DEBUG -> logcat(LogPriority.DEBUG) { message }
///             LogLevel.INFO -> logcat(LogPriority.INFO) { message }
///             LogLevel.WARN -> logcat(LogPriority.WARN) { message }
///             LogLevel.ERROR -> logcat(LogPriority.ERROR) { message }
///         }
///     }
/// }
///
/// // Application.onCreate, once
/// setLogger(TsundokuLogBridge)
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Logs a message at the specified level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log line.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing output.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of a migration session.
    Info,
    /// Recoverable failures, e.g. one entry failing inside a bulk migration.
    Warn,
    /// Failures surfaced to the user.
    Error,
}

/// Forwards records of the `log` crate to the foreign [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let is_record_from_tsundoku = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("tsundoku"));

        let is_debug_or_trace_level =
            record.level() == log::Level::Debug || record.level() == log::Level::Trace;

        // dependencies are only forwarded from info upwards
        if is_debug_or_trace_level && !is_record_from_tsundoku {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the app's logger. Only the first call has an effect.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        println!("Logger already set");
        return;
    }

    if let Err(err) = init_logger() {
        eprintln!("Failed to install logger: {err}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

/// Logs a trace-level message prefixed with the current [`LogContext`].
///
/// ```rust
/// use tsundoku::primitives::logger::LogContext;
///
/// let _ctx = LogContext::new("SmartSearchEngine");
/// tsundoku::trace!("query={}", "berserk");
/// ```
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::trace!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::trace!($($arg)*)
        }
    };
}

/// Logs a debug-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::debug!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::debug!($($arg)*)
        }
    };
}

/// Logs an info-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::info!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::info!($($arg)*)
        }
    };
}

/// Logs a warning prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::warn!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::warn!($($arg)*)
        }
    };
}

/// Logs an error prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::error!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::error!($($arg)*)
        }
    };
}

/// Thread-local logging context.
pub mod context;
pub use context::{get_context, LogContext};
