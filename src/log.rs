//! Structured logging for iceberg runs.
//!
//! Log levels:
//! - ERROR: Failures that abort a run or a teardown
//! - WARN: Unexpected conditions that are recoverable (missing virtualenv, empty discovery)
//! - INFO: Run milestones (configuration, submissions, teardown)
//! - DEBUG: Builder traces (pre-exec commands, pipeline names)
//! - TRACE: Every submitted workflow as JSON
//!
//! Debug mode can be enabled with `--debug` flag or `ICEBERG_DEBUG=1` env var.
//! `ICEBERG_DEBUG=trace` also records each submitted workflow.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging to ~/.iceberg/iceberg.log, with DEBUG level when requested.
pub fn init_with_debug(debug: bool) {
    let level = level_for(debug, std::env::var("ICEBERG_DEBUG").ok().as_deref());
    DEBUG_ENABLED.store(level >= LogLevel::Debug, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".iceberg")) {
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("iceberg.log");
        // Truncate file on startup
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

/// Level selected by the `--debug` flag and the `ICEBERG_DEBUG` value.
fn level_for(debug: bool, env: Option<&str>) -> LogLevel {
    match env.map(str::to_lowercase).as_deref() {
        Some("trace") => LogLevel::Trace,
        Some("1") | Some("true") => LogLevel::Debug,
        _ if debug => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Log a message at the specified level.
///
/// Nothing is written until [`init_with_debug`] has picked a log file.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! ilog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! ilog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! ilog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! ilog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! ilog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
