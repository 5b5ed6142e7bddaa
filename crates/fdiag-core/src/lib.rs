//! # fdiag-core
//!
//! Core diagnostics for the fdiag foundation layer: per-thread error state,
//! per-thread error context frames, and the logger.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Crash interception and the OS-backed collaborators are in `fdiag-runtime`.
//!
//! ## Modules
//!
//! - `error` - Error codes, levels, warning classes, crate error type
//! - `state` - Per-thread current error (report / read-and-clear)
//! - `context` - Per-thread bounded stack of context frames
//! - `log` - Line formatting and sinks, logging macros
//! - `platform` - Clock, thread identity, event sink and OS log traits
//! - `config` - Runtime configuration with env overrides

pub mod error;
pub mod config;
pub mod platform;
pub mod state;
pub mod context;
pub mod log;

// Re-exports for convenience
pub use error::{DiagError, DiagResult, ErrorCode, ErrorLevel, WarningClass};
pub use config::{ConfigError, DiagConfig};
pub use context::{ContextScope, ErrorContext, ErrorFrame};
pub use log::{LogCallback, Stream};
pub use platform::{Clock, DiagEvent, EventSink, OsLogChannel, ThreadIdentity};
