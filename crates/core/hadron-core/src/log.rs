//! Leveled logging facade.
//!
//! This crate cannot itself own a serial port or a heap-backed sink list —
//! both are kernel-runtime concerns. Instead it exposes a pair of global
//! function-pointer hooks that the kernel installs during boot
//! ([`set_print_fn`], [`set_log_fn`]), plus the [`LogLevel`] enum and
//! [`LogSink`] trait every sink and call site agrees on. Before the hooks
//! are installed, calls are silently dropped, which only happens for the
//! handful of instructions executed before `init_early_serial`.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Severity of a log record, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Unrecoverable condition; the kernel is about to panic.
    Error = 0,
    /// Recoverable but noteworthy fault.
    Warn = 1,
    /// Normal operational messages.
    Info = 2,
    /// Verbose diagnostic detail, compiled out of release builds by sinks
    /// that check [`LogSink::max_level`].
    Debug = 3,
    /// Per-TRB / per-sector tracing, noisy even in debug builds.
    Trace = 4,
}

impl LogLevel {
    /// Parses a level from its lowercase name, used when reading boot
    /// configuration. Returns `None` on an unrecognized name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return None,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        })
    }
}

/// A destination for formatted log output.
///
/// Implementors are collected behind a lock in the kernel's post-heap
/// logger; each record is offered to every registered sink, which decides
/// for itself whether to emit based on [`LogSink::max_level`].
pub trait LogSink: Send {
    /// Writes a fully formatted line (caller has already applied level and
    /// target prefixes).
    fn write_str(&self, s: &str);

    /// The most verbose level this sink wants to see.
    fn max_level(&self) -> LogLevel;

    /// A short name used in panic messages when a sink itself fails.
    fn name(&self) -> &str;
}

type PrintFn = fn(fmt::Arguments<'_>);
type LogFn = fn(LogLevel, &str, fmt::Arguments<'_>);

static PRINT_FN: AtomicUsize = AtomicUsize::new(0);
static LOG_FN: AtomicUsize = AtomicUsize::new(0);

/// Installs the function used by [`_print`] (and thus `print!`/`println!`)
/// for unleveled output such as the early boot banner.
///
/// Intended to be called exactly once per boot phase (first with an
/// early-serial writer, again once the heap-backed logger is up).
pub fn set_print_fn(f: PrintFn) {
    PRINT_FN.store(f as usize, Ordering::Release);
}

/// Installs the function used by [`_log`] for leveled, targeted records.
pub fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as usize, Ordering::Release);
}

/// Forwards to the currently installed print hook. Does nothing if no hook
/// has been installed yet.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    let ptr = PRINT_FN.load(Ordering::Acquire);
    if ptr != 0 {
        let f: PrintFn = unsafe { core::mem::transmute(ptr) };
        f(args);
    }
}

/// Forwards to the currently installed log hook. Does nothing if no hook
/// has been installed yet.
#[doc(hidden)]
pub fn _log(level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
    let ptr = LOG_FN.load(Ordering::Acquire);
    if ptr != 0 {
        let f: LogFn = unsafe { core::mem::transmute(ptr) };
        f(level, target, args);
    }
}

/// Unleveled print, forwarded to the active sink with no prefix.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::log::_print(format_args!($($arg)*))
    };
}

/// Unleveled print with a trailing newline.
#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::log::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

/// Emits a leveled, targeted log record.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, module_path!(), format_args!($($arg)*))
    };
}

/// Emits an [`LogLevel::Error`] record.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Emits a [`LogLevel::Warn`] record.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Emits an [`LogLevel::Info`] record.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Emits a [`LogLevel::Debug`] record.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Emits a [`LogLevel::Trace`] record.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!($crate::log::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_print(_args: fmt::Arguments<'_>) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn parse_roundtrip() {
        assert_eq!(LogLevel::parse("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn print_hook_forwards() {
        set_print_fn(counting_print);
        let before = CALLS.load(Ordering::Relaxed);
        _print(format_args!("hello"));
        assert_eq!(CALLS.load(Ordering::Relaxed), before + 1);
    }
}
