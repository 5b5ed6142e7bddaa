//! # fdiag - Foundation Diagnostics
//!
//! Error reporting, diagnostic context and crash containment for the lowest
//! layer of an application.
//!
//! ## Features
//!
//! - **Error state**: one error code per thread, overwritten by reports and
//!   cleared by reads
//! - **Error context**: bounded per-thread stack of "When <doing>: <detail>"
//!   frames, logged under every warning and error
//! - **Logger**: timestamped lines tagged with thread identity to the standard
//!   streams, an optional callback and syslog; long lines grow from a stack
//!   buffer to an exact-size heap buffer
//! - **Crash guards**: run an operation so that a segfault, bus error, illegal
//!   instruction, arithmetic fault or trap produces a dump file and a callback
//!   instead of a dead process
//!
//! ## Quick Start
//!
//! ```ignore
//! use fdiag::{context, guard, log_error, CrashResult, ErrorCode, ErrorLevel};
//!
//! fn main() -> fdiag::DiagResult<()> {
//!     fdiag::init()?;
//!
//!     let _frame = context::scope("loading plugin", "codec.so");
//!     match guard("plugin", |dump| eprintln!("dump at {}", dump.display()), || run_plugin()) {
//!         CrashResult::Completed(()) => {}
//!         CrashResult::CrashDumpGenerated(_) => {
//!             log_error!(ErrorLevel::Error, ErrorCode::Exception, "plugin crashed, disabled");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        log_*!(), context::scope(), guard(), error()         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌──────────────────────────┐      ┌──────────────────────────┐
//!    │       fdiag-core         │      │      fdiag-runtime       │
//!    │  state, context, logger  │◄─────│  crash guards, signals,  │
//!    │  config, platform traits │      │  fiber stacks, OS clock  │
//!    └──────────────────────────┘      └──────────────────────────┘
//! ```

// Re-export core types
pub use fdiag_core::{
    ConfigError,
    ContextScope,
    DiagConfig,
    DiagError,
    DiagEvent,
    DiagResult,
    ErrorCode,
    ErrorContext,
    ErrorFrame,
    ErrorLevel,
    LogCallback,
    Stream,
    WarningClass,
};
pub use fdiag_core::{Clock, EventSink, OsLogChannel, ThreadIdentity};
pub use fdiag_core::{config, context, log, platform, state};

// Re-export logging macros
pub use fdiag_core::{log_debug, log_error, log_info, log_warn};
pub use fdiag_core::log::{set_callback, set_log_level, set_stdout_enabled};

// Re-export runtime types
pub use fdiag_runtime::{
    crash,
    debug_break,
    debugger_attached,
    guard,
    guard_clear,
    guard_set,
    spawn,
    try_guard,
    CrashResult,
    GuardSpec,
};

/// Report `code` as the calling thread's current error
///
/// Warning and error levels also log the thread's error context.
#[inline]
pub fn report(level: ErrorLevel, code: ErrorCode) {
    state::report(level, code)
}

/// Take the calling thread's current error, resetting it to `ErrorCode::None`
#[inline]
pub fn error() -> ErrorCode {
    state::error()
}

/// Initialize with configuration from the environment
///
/// See [`DiagConfig::from_env`] for the variables read.
pub fn init() -> DiagResult<()> {
    init_with(DiagConfig::from_env())
}

/// Apply `config` and install the platform collaborators
///
/// Installs the OS clock, kernel thread ids and (when `config.syslog` is
/// set) the syslog mirror. Calling it again replaces the configuration.
pub fn init_with(config: DiagConfig) -> DiagResult<()> {
    config.apply()?;
    fdiag_runtime::install();
    log_debug!("fdiag initialized, dumps go to {}", fdiag_core::config::dump_dir().display());
    Ok(())
}
