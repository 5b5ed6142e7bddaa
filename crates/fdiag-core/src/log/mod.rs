//! Logger
//!
//! Every line carries a header with the uptime, the calling thread's
//! identity and a level prefix:
//!
//! ```text
//! [12.034] <1f3a:2> WARNING: cache miss rate 41%
//! ```
//!
//! Lines are formatted into a fixed stack buffer and only touch the heap when
//! they do not fit (see [`buffer`]). A finished line goes to the standard
//! streams (when enabled), the OS log channel (when installed) and the
//! callback (when set), in that order, each exactly once.
//!
//! # Usage
//!
//! ```ignore
//! use fdiag_core::{log_info, log_warn, log_error};
//! use fdiag_core::{ErrorCode, ErrorLevel, WarningClass};
//!
//! log_info!("worker {} started", id);
//! log_warn!(WarningClass::Performance, "queue depth {}", depth);
//! let code = log_error!(ErrorLevel::Error, ErrorCode::InvalidValue, "bad header {:?}", hdr);
//! ```

pub mod buffer;

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{self, defaults};
use crate::error::{ErrorCode, ErrorLevel, WarningClass};
use crate::platform::{self, DiagEvent};
use crate::{context, state};

/// Standard stream a line is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Error and panic lines go to stderr, the rest to stdout
    #[inline]
    pub fn for_level(level: ErrorLevel) -> Self {
        if level.is_error() {
            Stream::Stderr
        } else {
            Stream::Stdout
        }
    }
}

/// Receives every emitted line, newline included
pub type LogCallback = Arc<dyn Fn(ErrorLevel, &str) + Send + Sync>;

static CALLBACK: RwLock<Option<LogCallback>> = RwLock::new(None);

/// Whether a line at `level` passes the enable switches and the threshold
#[inline]
pub fn level_enabled(level: ErrorLevel) -> bool {
    let switched_on = match level {
        ErrorLevel::Debug => config::debug_log_enabled(),
        _ => config::log_enabled(),
    };
    switched_on && level >= config::log_level()
}

/// Format one line and hand it to every sink.
///
/// `stream` overrides the level's default standard stream.
pub fn emit(level: ErrorLevel, prefix: &str, args: fmt::Arguments<'_>, stream: Option<Stream>) {
    if !level_enabled(level) {
        return;
    }

    let uptime = platform::clock().uptime();
    let (tid, hw) = platform::thread_identity();

    let mut stack = [0u8; defaults::LOG_BUFFER_SIZE];
    buffer::format_line(
        &mut stack,
        format_args!("[{:.3}] <{:x}:{}> {}", uptime, tid, hw, prefix),
        args,
        usize::MAX,
        |line| dispatch(level, line, stream.unwrap_or_else(|| Stream::for_level(level))),
    );
}

fn dispatch(level: ErrorLevel, line: &str, stream: Stream) {
    if config::log_stdout() {
        let flush = config::log_flush();
        match stream {
            Stream::Stdout => write_line(io::stdout().lock(), line, flush),
            Stream::Stderr => write_line(io::stderr().lock(), line, flush),
        }
        if let Some(channel) = platform::os_log_channel() {
            channel.write(level, line);
        }
    }

    let callback = CALLBACK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(callback) = callback {
        callback(level, line);
    }
}

/// Lock held for the whole line so concurrent lines never interleave
fn write_line(mut handle: impl Write, line: &str, flush: bool) {
    let _ = handle.write_all(line.as_bytes());
    if flush {
        let _ = handle.flush();
    }
}

// ============================================================================
// Leveled entry points
// ============================================================================

pub fn debug(args: fmt::Arguments<'_>) {
    emit(ErrorLevel::Debug, "", args, None);
}

pub fn info(args: fmt::Arguments<'_>) {
    emit(ErrorLevel::Info, "", args, None);
}

/// Warning line followed by the calling thread's context frames
pub fn warn(class: WarningClass, args: fmt::Arguments<'_>) {
    emit(ErrorLevel::Warning, "WARNING: ", args, None);
    context::render(ErrorLevel::Warning);
    platform::post_event(&DiagEvent::Warning { class });
}

/// Record `code`, log it with the context frames and return it.
///
/// Levels below `Error` are raised to `Error`.
pub fn error(level: ErrorLevel, code: ErrorCode, args: fmt::Arguments<'_>) -> ErrorCode {
    let level = level.max(ErrorLevel::Error);
    state::record(code);

    let prefix = match level {
        ErrorLevel::Panic => "PANIC: ",
        _ => "ERROR: ",
    };
    emit(level, prefix, args, None);
    context::render(level);
    platform::post_event(&DiagEvent::Error { level, code });
    code
}

// ============================================================================
// Sink configuration
// ============================================================================

/// Enable or disable the standard stream sink
pub fn set_stdout_enabled(enable: bool) {
    config::set_log_stdout(enable);
}

/// Install (or remove, with `None`) the line callback
pub fn set_callback(callback: Option<LogCallback>) {
    *CALLBACK.write().unwrap_or_else(PoisonError::into_inner) = callback;
}

/// Drop lines below `min`
pub fn set_log_level(min: ErrorLevel) {
    config::set_log_level(min);
}

/// Flush the standard stream after every line
pub fn set_flush_enabled(enable: bool) {
    config::set_log_flush(enable);
}

pub fn set_enabled(enable: bool) {
    config::set_log_enabled(enable);
}

pub fn set_debug_enabled(enable: bool) {
    config::set_debug_log_enabled(enable);
}

// ============================================================================
// Public Macros
// ============================================================================

/// Debug line (dropped unless debug logging is enabled)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log::debug(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log::info(format_args!($($arg)*));
    }};
}

/// Warning line tagged with a [`WarningClass`](crate::WarningClass)
#[macro_export]
macro_rules! log_warn {
    ($class:expr, $($arg:tt)*) => {{
        $crate::log::warn($class, format_args!($($arg)*));
    }};
}

/// Error line; evaluates to the recorded [`ErrorCode`](crate::ErrorCode)
#[macro_export]
macro_rules! log_error {
    ($level:expr, $code:expr, $($arg:tt)*) => {
        $crate::log::error($level, $code, format_args!($($arg)*))
    };
}
