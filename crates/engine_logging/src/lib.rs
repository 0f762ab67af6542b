#![deny(missing_docs)]
//! Shared logging utilities for the tracker workspace.
//!
//! Components never talk to the global logger directly. They hold an
//! [`EventLog`] handle that is passed in at construction time, and the
//! `engine_*` macros format a message and hand it to that handle.

use std::fmt;
use std::sync::{Arc, Mutex};

pub use log::Level;

/// Destination for structured log records.
pub trait EventLog: Send + Sync {
    /// Records one formatted message at `level` on behalf of `target`.
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>);
}

/// Shared, thread-safe log handle as held by components.
pub type SharedLog = Arc<dyn EventLog>;

/// Forwards records to the `log` facade (and so to whatever logger the
/// binary installed).
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLog;

impl FacadeLog {
    /// Returns a shared handle to the facade logger.
    pub fn shared() -> SharedLog {
        Arc::new(FacadeLog)
    }
}

impl EventLog for FacadeLog {
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        log::log!(target: target, level, "{}", args);
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl NullLog {
    /// Returns a shared handle that drops everything.
    pub fn shared() -> SharedLog {
        Arc::new(NullLog)
    }
}

impl EventLog for NullLog {
    fn record(&self, _level: Level, _target: &str, _args: fmt::Arguments<'_>) {}
}

/// One captured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity of the record.
    pub level: Level,
    /// Module that emitted the record.
    pub target: String,
    /// Rendered message.
    pub message: String,
}

/// Keeps every record in memory. Used by tests to assert on what a
/// component reported.
#[derive(Debug, Default)]
pub struct RecordingLog {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLog {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all captured records.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Returns the messages captured at exactly `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| record.level == level)
            .map(|record| record.message)
            .collect()
    }

    /// True when some record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages_at(level)
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl EventLog for RecordingLog {
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                target: target.to_string(),
                message: args.to_string(),
            });
        }
    }
}

/// Logs a trace-level message through the given [`EventLog`] handle.
#[macro_export]
macro_rules! engine_trace {
    ($log:expr, $($arg:tt)*) => {{
        $crate::EventLog::record(&*$log, $crate::Level::Trace, module_path!(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message through the given [`EventLog`] handle.
#[macro_export]
macro_rules! engine_info {
    ($log:expr, $($arg:tt)*) => {{
        $crate::EventLog::record(&*$log, $crate::Level::Info, module_path!(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message through the given [`EventLog`] handle.
#[macro_export]
macro_rules! engine_debug {
    ($log:expr, $($arg:tt)*) => {{
        $crate::EventLog::record(&*$log, $crate::Level::Debug, module_path!(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message through the given [`EventLog`] handle.
#[macro_export]
macro_rules! engine_warn {
    ($log:expr, $($arg:tt)*) => {{
        $crate::EventLog::record(&*$log, $crate::Level::Warn, module_path!(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message through the given [`EventLog`] handle.
#[macro_export]
macro_rules! engine_error {
    ($log:expr, $($arg:tt)*) => {{
        $crate::EventLog::record(&*$log, $crate::Level::Error, module_path!(), format_args!($($arg)*));
    }};
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_log_captures_level_and_message() {
        let log: SharedLog = Arc::new(RecordingLog::new());
        engine_warn!(log, "skipped {} of {}", 1, 3);

        let recorder = RecordingLog::new();
        engine_error!(&recorder, "dropped result for {}", "https://example.com");
        assert!(recorder.contains(Level::Error, "dropped result"));
        assert!(recorder.messages_at(Level::Warn).is_empty());
        assert_eq!(recorder.records()[0].target, module_path!());
    }

    #[test]
    fn null_log_accepts_everything() {
        let log = NullLog;
        engine_info!(&log, "nothing to see");
        engine_debug!(&log, "still nothing");
    }
}
