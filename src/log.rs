//! A simple logging utility for emitting messages based on severity levels.
//!
//! The maximum level defaults to [Level::Info] and can be changed at runtime
//! with [set_max_level], or from the `SIMTCP_LOG` environment variable with
//! [init_from_env].

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::{env, fmt, mem, time};

/// Source of the log message.
const SOURCE: &str = "simtcp";

/// Environment variable consulted by [init_from_env].
pub const LOG_ENV: &str = "SIMTCP_LOG";

/// Highest severity value that is emitted. `0` disables logging.
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Logs a message at the [Level::Error] level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Error) {
            $crate::log::log($crate::log::Level::Error, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Warn] level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Warn) {
            $crate::log::log($crate::log::Level::Warn, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Info] level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Info) {
            $crate::log::log($crate::log::Level::Info, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Debug] level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Debug) {
            $crate::log::log($crate::log::Level::Debug, format!($($arg)+));
        }
    }};
}

/// Severity levels for log messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Designates very serious errors.
    Error = 1,
    /// Designates hazardous situations.
    Warn = 2,
    /// Designates useful information.
    Info = 3,
    /// Designates lower priority information.
    Debug = 4,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => f.write_str("error"),
            Level::Warn => f.write_str("warn"),
            Level::Info => f.write_str("info"),
            Level::Debug => f.write_str("debug"),
        }
    }
}

/// Error returned when parsing a level filter from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError(String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid log level: {:?} (expected one of off, error, warn, info, debug)",
            self.0
        )
    }
}

impl std::error::Error for ParseLevelError {}

/// Parsed value of a level filter, where `None` means logging is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFilter(pub Option<Level>);

impl FromStr for LevelFilter {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LevelFilter(None)),
            "error" => Ok(LevelFilter(Some(Level::Error))),
            "warn" | "warning" => Ok(LevelFilter(Some(Level::Warn))),
            "info" => Ok(LevelFilter(Some(Level::Info))),
            "debug" | "trace" => Ok(LevelFilter(Some(Level::Debug))),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Sets the most verbose level that will be emitted. `None` silences all
/// output.
pub fn set_max_level(level: Option<Level>) {
    MAX_LEVEL.store(level.map_or(0, |l| l as u8), Ordering::Relaxed);
}

/// Returns the most verbose level that will be emitted, if any.
pub fn max_level() -> Option<Level> {
    match MAX_LEVEL.load(Ordering::Relaxed) {
        1 => Some(Level::Error),
        2 => Some(Level::Warn),
        3 => Some(Level::Info),
        4 => Some(Level::Debug),
        _ => None,
    }
}

/// Returns `true` if messages at `level` are currently emitted.
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Configures the maximum level from the `SIMTCP_LOG` environment variable.
///
/// An unset variable leaves the current level untouched.
///
/// # Errors
///
/// Returns an error if the variable is set but does not name a level.
pub fn init_from_env() -> Result<(), ParseLevelError> {
    if let Ok(value) = env::var(LOG_ENV) {
        let LevelFilter(level) = value.parse()?;
        set_max_level(level);
    }

    Ok(())
}

/// Logs a message with the specified severity level.
///
/// - [Level::Info] and [Level::Debug] messages are printed to `stdout`.
/// - [Level::Warn] and [Level::Error] messages are printed to `stderr`.
///
/// The log message will include a timestamp, severity level, and the source of
/// the log (`simtcp`).
pub fn log(level: Level, msg: impl fmt::Display) {
    let timestamp = local_timestamp();

    match level {
        Level::Error => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;31mERROR\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Warn => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;33mWARN \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Info => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;32mINFO \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Debug => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;34mDEBUG\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
    }
}

/// Formats the current wall-clock time in the local timezone.
fn local_timestamp() -> String {
    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let time = now as libc::time_t;

    // SAFETY: `tm` is a plain C struct for which all-zero bytes is a valid
    // value, and `localtime_r` only writes into the buffer we own.
    let mut tm: libc::tm = unsafe { mem::zeroed() };
    let res = unsafe { libc::localtime_r(&time, &mut tm) };

    if res.is_null() {
        return "UNKNOWN".to_string();
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_parsing() {
        assert_eq!("off".parse(), Ok(LevelFilter(None)));
        assert_eq!(" Debug ".parse(), Ok(LevelFilter(Some(Level::Debug))));
        assert_eq!("warning".parse(), Ok(LevelFilter(Some(Level::Warn))));
        assert!("loud".parse::<LevelFilter>().is_err());
    }

    #[test]
    fn levels_are_ordered_by_verbosity() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Info < Level::Debug);
    }

    #[test]
    fn timestamp_has_fixed_width() {
        let ts = local_timestamp();
        assert!(ts == "UNKNOWN" || ts.len() == 19, "unexpected timestamp {ts}");
    }
}
