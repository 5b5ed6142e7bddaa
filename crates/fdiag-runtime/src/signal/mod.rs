//! Signal handling for fault interception
//!
//! Installs one process-wide handler for the synchronous fault signals and
//! gives guarding threads an alternate signal stack, so that faults caused
//! by stack overflow can still be handled.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
