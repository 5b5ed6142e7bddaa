//! Environment lookups used by `DiagConfig::from_env`
//!
//! Unset or unparsable variables fall back to the compile-time default.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ErrorLevel;

/// Parse `key` as `T`, or return `default`
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and valid
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean switch: "1", "true", "yes", "on" enable; "0", "false", "no", "off"
/// disable; anything else keeps `default`.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => parse_switch(&val).unwrap_or(default),
        Err(_) => default,
    }
}

pub(crate) fn parse_switch(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Severity threshold from a level name or number
pub fn env_get_level(key: &str, default: ErrorLevel) -> ErrorLevel {
    std::env::var(key)
        .ok()
        .and_then(|v| ErrorLevel::parse(&v))
        .unwrap_or(default)
}

/// Non-empty path value
pub fn env_get_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_uses_default() {
        let val: usize = env_get("__FDIAG_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__FDIAG_TEST_UNSET__", true));
        assert!(env_get_path("__FDIAG_TEST_UNSET__").is_none());
        assert_eq!(
            env_get_level("__FDIAG_TEST_UNSET__", ErrorLevel::Info),
            ErrorLevel::Info
        );
    }

    #[test]
    fn test_switch_values() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch(" yes "), Some(true));
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }

    #[test]
    fn test_set_values() {
        std::env::set_var("__FDIAG_TEST_DEPTH__", " 64 ");
        let depth: usize = env_get("__FDIAG_TEST_DEPTH__", 32);
        assert_eq!(depth, 64);

        std::env::set_var("__FDIAG_TEST_DEPTH__", "deep");
        let depth: usize = env_get("__FDIAG_TEST_DEPTH__", 32);
        assert_eq!(depth, 32);
        std::env::remove_var("__FDIAG_TEST_DEPTH__");

        std::env::set_var("__FDIAG_TEST_LEVEL__", "error");
        assert_eq!(
            env_get_level("__FDIAG_TEST_LEVEL__", ErrorLevel::Debug),
            ErrorLevel::Error
        );
        std::env::remove_var("__FDIAG_TEST_LEVEL__");
    }
}
