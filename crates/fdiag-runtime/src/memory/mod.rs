//! Stack memory for guarded operations and signal handling
//!
//! Platform-specific implementations handle virtual memory allocation.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
