//! Portable platform implementation
//!
//! Keeps the core's default clock and thread identity.

/// Nothing to install beyond the core defaults
pub fn install() {}

/// No portable way to tell
pub fn debugger_attached() -> bool {
    false
}
