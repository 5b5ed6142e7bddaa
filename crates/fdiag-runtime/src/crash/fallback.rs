//! Crash guards on platforms without fault trapping
//!
//! Operations run directly on the caller's stack. A fault there takes the
//! platform's default action.

use std::path::Path;
use std::sync::{Arc, Once};

use fdiag_core::error::{DiagResult, WarningClass};
use fdiag_core::log;

use super::{CrashResult, GuardSpec};

pub type Prepared = ();

static WARNED: Once = Once::new();

fn warn_unsupported() {
    WARNED.call_once(|| {
        log::warn(
            WarningClass::Unsupported,
            format_args!("crash guards are not supported on this platform; faults will not be intercepted"),
        );
    });
}

pub fn prepare() -> DiagResult<Prepared> {
    warn_unsupported();
    Ok(())
}

pub fn run<F, R>(_stack: Prepared, _label: &str, _on_crash: impl FnOnce(&Path), op: F) -> CrashResult<R>
where
    F: FnOnce() -> R,
{
    CrashResult::Completed(op())
}

pub fn guard_set(_spec: Arc<GuardSpec>) -> DiagResult<()> {
    warn_unsupported();
    Ok(())
}

pub fn guard_clear() {}

pub fn persistent_spec() -> Option<Arc<GuardSpec>> {
    None
}
