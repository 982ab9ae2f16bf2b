//! File logging for the orchestrator and swarm.
//!
//! What goes where:
//! - ERROR: plan deadlocks and failing member callbacks
//! - WARN: agent calls that failed or timed out, breakers opening
//! - INFO: registrations, plan start/finish, joins and leaves
//! - DEBUG: rounds, breaker transitions, dropped events
//! - TRACE: candidate filtering
//!
//! Nothing is written until [`init`] or [`init_with_path`] picks a file.
//! `TASKMESH_DEBUG=1` raises the level to DEBUG at init time.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static SINK: OnceLock<PathBuf> = OnceLock::new();
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        })
    }
}

/// Log to `~/.taskmesh/taskmesh.log`.
pub fn init(debug: bool) {
    if let Ok(dir) = crate::config::Config::home_dir() {
        init_with_path(&dir.join("taskmesh.log"), debug);
    }
}

/// Log to `path`, truncating it.
///
/// Only the first call picks the file; later calls still reset the level.
pub fn init_with_path(path: &Path, debug: bool) {
    let from_env = std::env::var("TASKMESH_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    set_level(if debug || from_env {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    if SINK.get().is_none() {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(path, "");
        let _ = SINK.set(path.to_path_buf());
    }
}

/// The log file, once logging is initialized.
pub fn path() -> Option<&'static Path> {
    SINK.get().map(PathBuf::as_path)
}

pub fn set_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Whether a record at `level` would be written.
pub fn enabled(level: LogLevel) -> bool {
    SINK.get().is_some() && level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn write(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let Some(path) = SINK.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level, args);
    }
}

/// Log at INFO.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, format_args!($($arg)*))
    };
}
