//! Error codes, severity levels and the crate error type

use core::fmt;

use crate::config::ConfigError;

/// Failure category recorded in a thread's error state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Rest state, nothing reported
    #[default]
    None = 0,
    InvalidValue,
    Unsupported,
    NotImplemented,
    OutOfMemory,
    MemoryLeak,
    MemoryAlignment,
    InternalFailure,
    AccessDenied,
    /// A fault was intercepted by a crash guard
    Exception,
    SystemCallFail,
    UnknownType,
    UnknownResource,
    Deprecated,
    Assert,
    Script,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::None => "none",
            ErrorCode::InvalidValue => "invalid value",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::MemoryLeak => "memory leak",
            ErrorCode::MemoryAlignment => "memory alignment",
            ErrorCode::InternalFailure => "internal failure",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::Exception => "exception",
            ErrorCode::SystemCallFail => "system call failed",
            ErrorCode::UnknownType => "unknown type",
            ErrorCode::UnknownResource => "unknown resource",
            ErrorCode::Deprecated => "deprecated",
            ErrorCode::Assert => "assert",
            ErrorCode::Script => "script",
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        *self == ErrorCode::None
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Panic = 4,
}

impl ErrorLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ErrorLevel::Debug,
            1 => ErrorLevel::Info,
            2 => ErrorLevel::Warning,
            3 => ErrorLevel::Error,
            _ => ErrorLevel::Panic,
        }
    }

    /// Parse a level name or number, as accepted by `FDIAG_LOG_LEVEL`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "0" => Some(ErrorLevel::Debug),
            "info" | "1" => Some(ErrorLevel::Info),
            "warn" | "warning" | "2" => Some(ErrorLevel::Warning),
            "error" | "3" => Some(ErrorLevel::Error),
            "panic" | "4" => Some(ErrorLevel::Panic),
            _ => None,
        }
    }

    /// Levels that surface the error-context stack when reported
    #[inline]
    pub fn logs_context(&self) -> bool {
        matches!(self, ErrorLevel::Warning | ErrorLevel::Error)
    }

    /// Levels routed to the error stream by default
    #[inline]
    pub fn is_error(&self) -> bool {
        *self >= ErrorLevel::Error
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Debug => "debug",
            ErrorLevel::Info => "info",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
            ErrorLevel::Panic => "panic",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category attached to a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningClass {
    Performance,
    Deprecated,
    BadData,
    Memory,
    Unsupported,
    Suspicious,
    SystemCallFail,
    Deadlock,
    Script,
    Resource,
}

impl fmt::Display for WarningClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningClass::Performance => "performance",
            WarningClass::Deprecated => "deprecated",
            WarningClass::BadData => "bad data",
            WarningClass::Memory => "memory",
            WarningClass::Unsupported => "unsupported",
            WarningClass::Suspicious => "suspicious",
            WarningClass::SystemCallFail => "system call failed",
            WarningClass::Deadlock => "deadlock",
            WarningClass::Script => "script",
            WarningClass::Resource => "resource",
        };
        f.write_str(name)
    }
}

/// Result type for fallible diagnostics setup
pub type DiagResult<T> = Result<T, DiagError>;

/// Errors raised while setting up diagnostics machinery
///
/// Logging and error reporting never fail; only configuration and the
/// installation of crash-guard resources can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagError {
    /// sigaction failed for the given signal
    SignalSetupFailed(i32),

    /// sigaltstack could not be installed for this thread
    AltStackFailed(i32),

    /// mmap/mprotect for a guard stack failed
    StackAllocationFailed(i32),

    /// Configuration rejected at initialization
    Config(ConfigError),
}

impl fmt::Display for DiagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagError::SignalSetupFailed(sig) => {
                write!(f, "failed to install handler for signal {}", sig)
            }
            DiagError::AltStackFailed(errno) => {
                write!(f, "failed to install alternate signal stack (errno {})", errno)
            }
            DiagError::StackAllocationFailed(errno) => {
                write!(f, "guard stack allocation failed (errno {})", errno)
            }
            DiagError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DiagError {}

impl From<ConfigError> for DiagError {
    fn from(e: ConfigError) -> Self {
        DiagError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_order() {
        assert!(ErrorLevel::Debug < ErrorLevel::Info);
        assert!(ErrorLevel::Info < ErrorLevel::Warning);
        assert!(ErrorLevel::Warning < ErrorLevel::Error);
        assert!(ErrorLevel::Error < ErrorLevel::Panic);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(ErrorLevel::parse("WARN"), Some(ErrorLevel::Warning));
        assert_eq!(ErrorLevel::parse("3"), Some(ErrorLevel::Error));
        assert_eq!(ErrorLevel::parse("loud"), None);
        assert_eq!(ErrorLevel::from_u8(99), ErrorLevel::Panic);
    }

    #[test]
    fn test_context_levels() {
        assert!(ErrorLevel::Warning.logs_context());
        assert!(ErrorLevel::Error.logs_context());
        assert!(!ErrorLevel::Panic.logs_context());
        assert!(!ErrorLevel::Info.logs_context());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ErrorCode::AccessDenied.to_string(), "access denied");
        assert_eq!(
            DiagError::SignalSetupFailed(11).to_string(),
            "failed to install handler for signal 11"
        );
        assert!(ErrorCode::default().is_none());
    }

    #[test]
    fn test_config_error_converts() {
        let e: DiagError = ConfigError::InvalidValue("error_context_depth must be > 0").into();
        assert_eq!(e, DiagError::Config(ConfigError::InvalidValue("error_context_depth must be > 0")));
        assert_eq!(e.to_string(), "Invalid config: error_context_depth must be > 0");
    }
}
