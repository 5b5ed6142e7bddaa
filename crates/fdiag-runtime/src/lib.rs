//! # fdiag-runtime
//!
//! Platform-specific runtime for the fdiag diagnostics layer.
//!
//! This crate provides:
//! - Crash guards that turn a synchronous fault into a dump file and a
//!   callback instead of a dead process
//! - Persistent per-thread guards and threads that inherit them
//! - Guard stacks (mmap with a guard page) and the fault signal handler
//! - Context switching onto guard stacks (architecture-specific assembly)
//! - The OS collaborators for `fdiag-core`: monotonic clock, kernel thread
//!   ids and syslog
//!
//! Fault interception is available on Linux for x86_64 and aarch64. Other
//! targets get the same API, running operations unguarded.

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))] {
        pub mod arch;
        pub mod memory;
        pub mod signal;
        pub mod tls;
    }
}

pub mod crash;
pub mod thread;

// Re-exports
pub use crash::{debug_break, guard, guard_clear, guard_set, try_guard, CrashResult, GuardSpec};
pub use thread::spawn;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod platform_linux;
        pub use platform_linux::{debugger_attached, install, LinuxPlatform as CurrentPlatform, SyslogChannel};
    } else {
        mod platform_fallback;
        pub use platform_fallback::{debugger_attached, install};
    }
}
