//! fdiag Configuration
//!
//! Replaces compile-time feature switches with runtime settings.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Explicit `DiagConfig::apply()` / setter calls
//! 2. Environment variables, read once on first use
//! 3. Build-time defaults (`defaults`, see build.rs)
//!
//! # Example
//!
//! ```rust,ignore
//! use fdiag_core::config::DiagConfig;
//!
//! DiagConfig::from_env()
//!     .debug_log_enabled(false)
//!     .error_context_depth(64)
//!     .apply()?;
//! ```

pub mod defaults;
pub mod env;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Once, PoisonError, RwLock};

use crate::error::ErrorLevel;
use env::{env_get, env_get_bool, env_get_level, env_get_path};

/// Smallest accepted guard stack (one guard page is carved out of it)
pub const MIN_GUARD_STACK_SIZE: usize = 64 * 1024;

/// Largest accepted context stack capacity
pub const MAX_ERROR_CONTEXT_DEPTH: usize = 4096;

/// Diagnostics configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagConfig {
    /// Emit info/warning/error lines
    pub log_enabled: bool,
    /// Emit debug lines
    pub debug_log_enabled: bool,
    /// Lines below this level are dropped
    pub log_level: ErrorLevel,
    /// Standard output/error sink
    pub log_stdout: bool,
    /// Flush the stream after every line
    pub log_flush: bool,
    /// Mirror lines to the OS log channel (syslog on Unix)
    pub syslog: bool,
    /// Track per-thread error context frames
    pub error_context_enabled: bool,
    /// Frame capacity of each thread's context stack
    pub error_context_depth: usize,
    /// Directory receiving crash dumps (`None` = system temp dir)
    pub dump_dir: Option<PathBuf>,
    /// Stack size for operations run under a crash guard
    pub guard_stack_size: usize,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DiagConfig {
    /// Build-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FDIAG_LOG` - Enable logging (0/1)
    /// - `FDIAG_DEBUG_LOG` - Enable debug logging (0/1)
    /// - `FDIAG_LOG_LEVEL` - Minimum level (debug, info, warning, error, panic)
    /// - `FDIAG_LOG_STDOUT` - Standard stream sink (0/1)
    /// - `FDIAG_LOG_FLUSH` - Flush after each line (0/1)
    /// - `FDIAG_SYSLOG` - Mirror to syslog (0/1)
    /// - `FDIAG_ERROR_CONTEXT` - Error context tracking (0/1)
    /// - `FDIAG_ERROR_CONTEXT_DEPTH` - Frames per thread
    /// - `FDIAG_DUMP_DIR` - Crash dump directory
    /// - `FDIAG_GUARD_STACK_SIZE` - Guarded operation stack size in bytes
    ///
    /// Values that would fail [`validate`](Self::validate) are replaced by
    /// the build-time default.
    pub fn from_env() -> Self {
        Self::env_overrides().sanitized()
    }

    fn env_overrides() -> Self {
        Self {
            log_enabled: env_get_bool("FDIAG_LOG", defaults::LOG_ENABLED),
            debug_log_enabled: env_get_bool("FDIAG_DEBUG_LOG", defaults::DEBUG_LOG_ENABLED),
            log_level: env_get_level("FDIAG_LOG_LEVEL", ErrorLevel::Debug),
            log_stdout: env_get_bool("FDIAG_LOG_STDOUT", defaults::LOG_STDOUT),
            log_flush: env_get_bool("FDIAG_LOG_FLUSH", defaults::LOG_FLUSH),
            syslog: env_get_bool("FDIAG_SYSLOG", defaults::SYSLOG),
            error_context_enabled: env_get_bool(
                "FDIAG_ERROR_CONTEXT",
                defaults::ERROR_CONTEXT_ENABLED,
            ),
            error_context_depth: env_get(
                "FDIAG_ERROR_CONTEXT_DEPTH",
                defaults::ERROR_CONTEXT_DEPTH,
            ),
            dump_dir: env_get_path("FDIAG_DUMP_DIR"),
            guard_stack_size: env_get("FDIAG_GUARD_STACK_SIZE", defaults::GUARD_STACK_SIZE),
        }
    }

    /// Build-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            log_enabled: defaults::LOG_ENABLED,
            debug_log_enabled: defaults::DEBUG_LOG_ENABLED,
            log_level: ErrorLevel::Debug,
            log_stdout: defaults::LOG_STDOUT,
            log_flush: defaults::LOG_FLUSH,
            syslog: defaults::SYSLOG,
            error_context_enabled: defaults::ERROR_CONTEXT_ENABLED,
            error_context_depth: defaults::ERROR_CONTEXT_DEPTH,
            dump_dir: None,
            guard_stack_size: defaults::GUARD_STACK_SIZE,
        }
    }

    /// The configuration currently in effect
    pub fn current() -> Self {
        let s = settings();
        Self {
            log_enabled: s.log_enabled.load(Ordering::Relaxed),
            debug_log_enabled: s.debug_log_enabled.load(Ordering::Relaxed),
            log_level: ErrorLevel::from_u8(s.log_level.load(Ordering::Relaxed)),
            log_stdout: s.log_stdout.load(Ordering::Relaxed),
            log_flush: s.log_flush.load(Ordering::Relaxed),
            syslog: s.syslog.load(Ordering::Relaxed),
            error_context_enabled: s.error_context_enabled.load(Ordering::Relaxed),
            error_context_depth: s.error_context_depth.load(Ordering::Relaxed),
            dump_dir: s
                .dump_dir
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            guard_stack_size: s.guard_stack_size.load(Ordering::Relaxed),
        }
    }

    // Builder methods

    pub fn log_enabled(mut self, enable: bool) -> Self {
        self.log_enabled = enable;
        self
    }

    pub fn debug_log_enabled(mut self, enable: bool) -> Self {
        self.debug_log_enabled = enable;
        self
    }

    pub fn log_level(mut self, level: ErrorLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_stdout(mut self, enable: bool) -> Self {
        self.log_stdout = enable;
        self
    }

    pub fn log_flush(mut self, enable: bool) -> Self {
        self.log_flush = enable;
        self
    }

    pub fn syslog(mut self, enable: bool) -> Self {
        self.syslog = enable;
        self
    }

    pub fn error_context_enabled(mut self, enable: bool) -> Self {
        self.error_context_enabled = enable;
        self
    }

    pub fn error_context_depth(mut self, depth: usize) -> Self {
        self.error_context_depth = depth;
        self
    }

    pub fn dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn guard_stack_size(mut self, size: usize) -> Self {
        self.guard_stack_size = size;
        self
    }

    /// Replace every field `validate` would reject with its build-time default
    pub fn sanitized(mut self) -> Self {
        if !(1..=MAX_ERROR_CONTEXT_DEPTH).contains(&self.error_context_depth) {
            self.error_context_depth = defaults::ERROR_CONTEXT_DEPTH;
        }
        if self.guard_stack_size < MIN_GUARD_STACK_SIZE {
            self.guard_stack_size = defaults::GUARD_STACK_SIZE;
        }
        if matches!(&self.dump_dir, Some(dir) if dir.as_os_str().is_empty()) {
            self.dump_dir = None;
        }
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_context_depth == 0 {
            return Err(ConfigError::InvalidValue("error_context_depth must be > 0"));
        }
        if self.error_context_depth > MAX_ERROR_CONTEXT_DEPTH {
            return Err(ConfigError::InvalidValue("error_context_depth must be <= 4096"));
        }
        if self.guard_stack_size < MIN_GUARD_STACK_SIZE {
            return Err(ConfigError::InvalidValue("guard_stack_size must be >= 64KB"));
        }
        if matches!(&self.dump_dir, Some(dir) if dir.as_os_str().is_empty()) {
            return Err(ConfigError::InvalidValue("dump_dir must not be empty"));
        }
        Ok(())
    }

    /// Validate and make this the process-wide configuration.
    ///
    /// Expected at startup. The context depth applies to threads whose
    /// context stack is created afterwards.
    pub fn apply(&self) -> Result<(), ConfigError> {
        self.validate()?;
        // Claim lazy init so a later first read does not reload the env.
        LOAD.call_once(|| {});
        self.store(&SETTINGS);
        Ok(())
    }

    fn store(&self, s: &Settings) {
        s.log_enabled.store(self.log_enabled, Ordering::Relaxed);
        s.debug_log_enabled.store(self.debug_log_enabled, Ordering::Relaxed);
        s.log_level.store(self.log_level as u8, Ordering::Relaxed);
        s.log_stdout.store(self.log_stdout, Ordering::Relaxed);
        s.log_flush.store(self.log_flush, Ordering::Relaxed);
        s.syslog.store(self.syslog, Ordering::Relaxed);
        s.error_context_enabled.store(self.error_context_enabled, Ordering::Relaxed);
        s.error_context_depth.store(
            self.error_context_depth.clamp(1, MAX_ERROR_CONTEXT_DEPTH),
            Ordering::Relaxed,
        );
        s.guard_stack_size.store(self.guard_stack_size.max(MIN_GUARD_STACK_SIZE), Ordering::Relaxed);
        *s.dump_dir.write().unwrap_or_else(PoisonError::into_inner) = self.dump_dir.clone();
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("fdiag Configuration:");
        eprintln!("  log_enabled:            {}", self.log_enabled);
        eprintln!("  debug_log_enabled:      {}", self.debug_log_enabled);
        eprintln!("  log_level:              {}", self.log_level);
        eprintln!("  log_stdout:             {}", self.log_stdout);
        eprintln!("  log_flush:              {}", self.log_flush);
        eprintln!("  syslog:                 {}", self.syslog);
        eprintln!("  error_context_enabled:  {}", self.error_context_enabled);
        eprintln!("  error_context_depth:    {}", self.error_context_depth);
        eprintln!("  dump_dir:               {}", dump_dir_or_temp(self.dump_dir.as_deref()).display());
        eprintln!("  guard_stack_size:       {}", self.guard_stack_size);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Live settings
// ============================================================================

/// Process-wide settings read on hot paths
struct Settings {
    log_enabled: AtomicBool,
    debug_log_enabled: AtomicBool,
    log_level: AtomicU8,
    log_stdout: AtomicBool,
    log_flush: AtomicBool,
    syslog: AtomicBool,
    error_context_enabled: AtomicBool,
    error_context_depth: AtomicUsize,
    guard_stack_size: AtomicUsize,
    dump_dir: RwLock<Option<PathBuf>>,
}

impl Settings {
    /// Build-time defaults
    const fn new() -> Self {
        Settings {
            log_enabled: AtomicBool::new(defaults::LOG_ENABLED),
            debug_log_enabled: AtomicBool::new(defaults::DEBUG_LOG_ENABLED),
            log_level: AtomicU8::new(ErrorLevel::Debug as u8),
            log_stdout: AtomicBool::new(defaults::LOG_STDOUT),
            log_flush: AtomicBool::new(defaults::LOG_FLUSH),
            syslog: AtomicBool::new(defaults::SYSLOG),
            error_context_enabled: AtomicBool::new(defaults::ERROR_CONTEXT_ENABLED),
            error_context_depth: AtomicUsize::new(defaults::ERROR_CONTEXT_DEPTH),
            guard_stack_size: AtomicUsize::new(defaults::GUARD_STACK_SIZE),
            dump_dir: RwLock::new(None),
        }
    }
}

static SETTINGS: Settings = Settings::new();

static LOAD: Once = Once::new();

/// Load from the environment on first use
#[inline]
fn settings() -> &'static Settings {
    LOAD.call_once(|| DiagConfig::from_env().store(&SETTINGS));
    &SETTINGS
}

#[inline]
pub fn log_enabled() -> bool {
    settings().log_enabled.load(Ordering::Relaxed)
}

#[inline]
pub fn debug_log_enabled() -> bool {
    settings().debug_log_enabled.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> ErrorLevel {
    ErrorLevel::from_u8(settings().log_level.load(Ordering::Relaxed))
}

#[inline]
pub fn log_stdout() -> bool {
    settings().log_stdout.load(Ordering::Relaxed)
}

#[inline]
pub fn log_flush() -> bool {
    settings().log_flush.load(Ordering::Relaxed)
}

#[inline]
pub fn syslog() -> bool {
    settings().syslog.load(Ordering::Relaxed)
}

#[inline]
pub fn error_context_enabled() -> bool {
    settings().error_context_enabled.load(Ordering::Relaxed)
}

#[inline]
pub fn error_context_depth() -> usize {
    settings().error_context_depth.load(Ordering::Relaxed)
}

#[inline]
pub fn guard_stack_size() -> usize {
    settings().guard_stack_size.load(Ordering::Relaxed)
}

/// Directory for crash dumps, falling back to the system temp dir
pub fn dump_dir() -> PathBuf {
    let dir = settings()
        .dump_dir
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    dump_dir_or_temp(dir.as_deref())
}

fn dump_dir_or_temp(dir: Option<&Path>) -> PathBuf {
    dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir)
}

pub(crate) fn set_log_enabled(enable: bool) {
    settings().log_enabled.store(enable, Ordering::Relaxed);
}

pub(crate) fn set_debug_log_enabled(enable: bool) {
    settings().debug_log_enabled.store(enable, Ordering::Relaxed);
}

pub(crate) fn set_log_level(level: ErrorLevel) {
    settings().log_level.store(level as u8, Ordering::Relaxed);
}

pub(crate) fn set_log_stdout(enable: bool) {
    settings().log_stdout.store(enable, Ordering::Relaxed);
}

pub(crate) fn set_log_flush(enable: bool) {
    settings().log_flush.store(enable, Ordering::Relaxed);
}

/// Toggle error context tracking at runtime
pub fn set_error_context_enabled(enable: bool) {
    settings().error_context_enabled.store(enable, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = DiagConfig::from_env();
        assert!(config.error_context_depth >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DiagConfig::new()
            .debug_log_enabled(false)
            .error_context_depth(8)
            .log_level(ErrorLevel::Warning)
            .dump_dir("/var/tmp/dumps");

        assert!(!config.debug_log_enabled);
        assert_eq!(config.error_context_depth, 8);
        assert_eq!(config.log_level, ErrorLevel::Warning);
        assert_eq!(config.dump_dir, Some(PathBuf::from("/var/tmp/dumps")));
    }

    #[test]
    fn test_validation() {
        assert!(DiagConfig::new().error_context_depth(0).validate().is_err());
        assert!(DiagConfig::new().error_context_depth(10_000).validate().is_err());
        assert!(DiagConfig::new().guard_stack_size(4096).validate().is_err());
        assert!(DiagConfig::new().dump_dir("").validate().is_err());
        assert!(DiagConfig::new().validate().is_ok());
    }

    #[test]
    fn test_sanitized_replaces_rejected_values() {
        let config = DiagConfig::new()
            .error_context_depth(usize::MAX)
            .guard_stack_size(0)
            .dump_dir("")
            .sanitized();

        assert!(config.validate().is_ok());
        assert_eq!(config.error_context_depth, defaults::ERROR_CONTEXT_DEPTH);
        assert_eq!(config.guard_stack_size, defaults::GUARD_STACK_SIZE);
        assert_eq!(config.dump_dir, None);

        let zero_depth = DiagConfig::new().error_context_depth(0).sanitized();
        assert_eq!(zero_depth.error_context_depth, defaults::ERROR_CONTEXT_DEPTH);

        let kept = DiagConfig::new().error_context_depth(7).guard_stack_size(1 << 20);
        assert_eq!(kept.clone().sanitized(), kept);
    }

    #[test]
    fn test_store_clamps_unchecked_values() {
        let s = Settings::new();
        DiagConfig::new()
            .error_context_depth(usize::MAX)
            .guard_stack_size(0)
            .store(&s);

        assert_eq!(s.error_context_depth.load(Ordering::Relaxed), MAX_ERROR_CONTEXT_DEPTH);
        assert_eq!(s.guard_stack_size.load(Ordering::Relaxed), MIN_GUARD_STACK_SIZE);

        DiagConfig::new().error_context_depth(0).store(&s);
        assert_eq!(s.error_context_depth.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_defaults_match_build() {
        let config = DiagConfig::new();
        assert_eq!(config.error_context_depth, defaults::ERROR_CONTEXT_DEPTH);
        assert_eq!(config.guard_stack_size, defaults::GUARD_STACK_SIZE);
        assert!(defaults::LOG_BUFFER_SIZE >= 64);
    }

    #[test]
    fn test_dump_dir_fallback() {
        assert_eq!(dump_dir_or_temp(None), std::env::temp_dir());
        assert_eq!(
            dump_dir_or_temp(Some(Path::new("/srv/dumps"))),
            PathBuf::from("/srv/dumps")
        );
    }
}
