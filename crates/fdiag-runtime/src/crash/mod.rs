//! Crash guards
//!
//! [`guard`] runs an operation with fault interception active for exactly
//! that call. A segfault, bus error, illegal instruction, arithmetic fault
//! or trap inside the operation does not kill the process: the fault is
//! recorded, a dump file is written, the crash is logged with the thread's
//! error context and the caller gets [`CrashResult::CrashDumpGenerated`].
//!
//! [`guard_set`] installs a persistent guard for the calling thread. A fault
//! outside any `guard` call on that thread is reported the same way, after
//! which the thread is retired (parked forever) instead of taking the
//! process down. Threads started with [`crate::thread::spawn`] inherit it.
//!
//! ```ignore
//! use fdiag_runtime::crash::{self, CrashResult};
//!
//! match crash::guard("decode", |dump| eprintln!("see {}", dump.display()), || decode(&input)) {
//!     CrashResult::Completed(frame) => show(frame),
//!     CrashResult::CrashDumpGenerated(path) => skip_input(path),
//! }
//! ```
//!
//! Values owned by a faulted operation are leaked, never dropped, and locks
//! it held stay held. A guard contains damage; it does not make the faulting
//! code correct.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fdiag_core::error::{DiagResult, ErrorCode, ErrorLevel};
use fdiag_core::log;

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))] {
        pub mod dump;
        pub(crate) mod frame;
        mod trap;
        pub(crate) use trap::intercept;
        use trap as imp;
    } else {
        mod fallback;
        use fallback as imp;
    }
}

/// Outcome of a guarded operation
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashResult<T> {
    /// The operation returned normally
    Completed(T),

    /// The operation faulted; the dump artifact is at this path
    CrashDumpGenerated(PathBuf),
}

impl<T> CrashResult<T> {
    #[inline]
    pub fn is_crash(&self) -> bool {
        matches!(self, CrashResult::CrashDumpGenerated(_))
    }

    /// The operation's value, if it completed
    pub fn completed(self) -> Option<T> {
        match self {
            CrashResult::Completed(value) => Some(value),
            CrashResult::CrashDumpGenerated(_) => None,
        }
    }

    /// Dump path, if it crashed
    pub fn dump_path(&self) -> Option<&Path> {
        match self {
            CrashResult::Completed(_) => None,
            CrashResult::CrashDumpGenerated(path) => Some(path),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CrashResult<U> {
        match self {
            CrashResult::Completed(value) => CrashResult::Completed(f(value)),
            CrashResult::CrashDumpGenerated(path) => CrashResult::CrashDumpGenerated(path),
        }
    }
}

/// Label and callback of a persistent guard
pub struct GuardSpec {
    label: String,
    on_crash: Box<dyn Fn(&Path) + Send + Sync>,
}

impl GuardSpec {
    pub fn new(label: impl Into<String>, on_crash: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            on_crash: Box::new(on_crash),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invoke the callback with a dump path
    pub fn notify(&self, path: &Path) {
        (self.on_crash)(path)
    }
}

impl fmt::Debug for GuardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardSpec").field("label", &self.label).finish_non_exhaustive()
    }
}

/// Run `op` under a crash guard.
///
/// `on_crash` is called exactly once with the dump path if `op` faults, and
/// never otherwise. A panic in `op` is propagated unchanged. If the guard
/// cannot be set up, the failure is logged and `op` runs unguarded.
pub fn guard<F, R>(label: &str, on_crash: impl FnOnce(&Path), op: F) -> CrashResult<R>
where
    F: FnOnce() -> R,
{
    match imp::prepare() {
        Ok(prepared) => imp::run(prepared, label, on_crash, op),
        Err(e) => {
            log::error(
                ErrorLevel::Error,
                ErrorCode::SystemCallFail,
                format_args!("crash guard '{}' unavailable, running unguarded: {}", label, e),
            );
            CrashResult::Completed(op())
        }
    }
}

/// Like [`guard`], but reports setup failure instead of running unguarded
pub fn try_guard<F, R>(label: &str, on_crash: impl FnOnce(&Path), op: F) -> DiagResult<CrashResult<R>>
where
    F: FnOnce() -> R,
{
    let prepared = imp::prepare()?;
    Ok(imp::run(prepared, label, on_crash, op))
}

/// Install a persistent guard for the calling thread, replacing any previous one
pub fn guard_set(
    label: impl Into<String>,
    on_crash: impl Fn(&Path) + Send + Sync + 'static,
) -> DiagResult<()> {
    imp::guard_set(Arc::new(GuardSpec::new(label, on_crash)))
}

pub(crate) fn guard_set_spec(spec: Arc<GuardSpec>) -> DiagResult<()> {
    imp::guard_set(spec)
}

/// Remove the calling thread's persistent guard
pub fn guard_clear() {
    imp::guard_clear()
}

/// The calling thread's persistent guard, if any
pub fn persistent_spec() -> Option<Arc<GuardSpec>> {
    imp::persistent_spec()
}

/// Fault deliberately at the call site (illegal instruction)
#[inline(never)]
pub fn debug_break() {
    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))] {
            crate::arch::trap();
        } else {
            std::process::abort();
        }
    }
}

#[cfg(all(test, target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;
    use fdiag_core::platform::{self, DiagEvent, EventSink};
    use fdiag_core::{context, state};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    fn under_debugger() -> bool {
        let attached = crate::debugger_attached();
        if attached {
            eprintln!("debugger attached, skipping crash test");
        }
        attached
    }

    fn expect_dump(result: &CrashResult<impl fmt::Debug>) -> PathBuf {
        let path = result.dump_path().expect("crash expected").to_path_buf();
        assert!(!path.as_os_str().is_empty());
        assert!(path.exists(), "dump {} missing", path.display());
        path
    }

    #[test]
    fn test_completed_passthrough() {
        let result = guard("value", |_| panic!("no crash expected"), || 40 + 2);
        assert_eq!(result, CrashResult::Completed(42));
        assert!(!crate::tls::in_guard());
    }

    #[test]
    fn test_debug_break_generates_dump() {
        if under_debugger() {
            return;
        }
        let calls = AtomicUsize::new(0);
        let seen = Mutex::new(None);

        let result = guard(
            "debug-break",
            |path| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().unwrap() = Some(path.to_path_buf());
            },
            || {
                debug_break();
                "unreachable"
            },
        );

        let path = expect_dump(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().as_deref(), Some(path.as_path()));
        assert_eq!(state::error(), ErrorCode::Exception);
        assert!(!crate::tls::in_guard());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("label:   debug-break\n"));
        assert!(text.contains("SIGILL"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_read_generates_dump() {
        if under_debugger() {
            return;
        }
        let result = guard("bad-read", |_| {}, || unsafe {
            std::ptr::read_volatile(std::hint::black_box(0x8usize) as *const u64)
        });

        let path = expect_dump(&result);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("SIGSEGV"));
        assert!(text.contains("address: 0x8\n"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_panic_propagates() {
        let calls = AtomicUsize::new(0);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            guard(
                "panics",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                },
                || -> u32 { panic!("guarded boom") },
            )
        }));

        let payload = outcome.expect_err("panic must cross the guard");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"guarded boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!crate::tls::in_guard());
    }

    #[test]
    fn test_nested_guards() {
        if under_debugger() {
            return;
        }
        let inner_calls = AtomicUsize::new(0);
        let outer_calls = AtomicUsize::new(0);

        let result = guard(
            "outer",
            |_| {
                outer_calls.fetch_add(1, Ordering::SeqCst);
            },
            || {
                let inner = guard(
                    "inner",
                    |_| {
                        inner_calls.fetch_add(1, Ordering::SeqCst);
                    },
                    debug_break,
                );
                let path = expect_dump(&inner);
                let _ = std::fs::remove_file(path);
                assert!(crate::tls::in_guard());
                7
            },
        );

        assert_eq!(result, CrashResult::Completed(7));
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outer_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_context_restored_after_crash() {
        if under_debugger() {
            return;
        }
        let Some(before) = context::depth() else {
            return;
        };
        let _frame = context::scope("running test", "context restore");

        let result = guard("context", |_| {}, || {
            context::push("step", "one");
            context::push("step", "two");
            let _scoped = context::scope("step", "three");
            debug_break();
        });

        let path = expect_dump(&result);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("When running test: context restore\n"));
        assert!(text.contains("When step: three\n"));
        assert_eq!(context::depth(), Some(before + 1));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_context_usable_after_fault_while_reading_it() {
        if under_debugger() {
            return;
        }
        let Some(before) = context::depth() else {
            return;
        };

        let result = guard("reading-context", |_| {}, || {
            context::with_current(|_| debug_break());
        });
        let path = expect_dump(&result);
        let _ = std::fs::remove_file(path);

        assert!(context::push("after", "crash"));
        assert_eq!(context::depth(), Some(before + 1));
        context::pop();
    }

    /// Crash dump events posted from the creating thread
    struct CrashEvents {
        owner: std::thread::ThreadId,
        seen: Mutex<Vec<(String, PathBuf)>>,
    }

    impl EventSink for CrashEvents {
        fn post(&self, event: &DiagEvent<'_>) {
            if let DiagEvent::CrashDump { label, path } = event {
                if std::thread::current().id() == self.owner {
                    self.seen.lock().unwrap().push((label.to_string(), path.to_path_buf()));
                }
            }
        }
    }

    #[test]
    fn test_crash_posts_dump_event() {
        if under_debugger() {
            return;
        }
        let events = Arc::new(CrashEvents {
            owner: std::thread::current().id(),
            seen: Mutex::new(Vec::new()),
        });
        platform::set_event_sink(Some(events.clone()));

        let result = guard("event-crash", |_| {}, debug_break);
        let fine = guard("event-fine", |_| {}, || 1);
        platform::set_event_sink(None);

        let path = expect_dump(&result);
        assert_eq!(fine, CrashResult::Completed(1));
        let seen = std::mem::take(&mut *events.seen.lock().unwrap());
        assert_eq!(seen, [("event-crash".to_string(), path.clone())]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_repeated_crashes_on_one_thread() {
        if under_debugger() {
            return;
        }
        for round in 0..3 {
            let result = guard("repeat", |_| {}, || {
                debug_break();
                round
            });
            let path = expect_dump(&result);
            let _ = std::fs::remove_file(path);
        }
        assert_eq!(guard("repeat", |_| {}, || "after"), CrashResult::Completed("after"));
    }

    #[test]
    fn test_guard_set_retires_faulting_thread() {
        if under_debugger() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            guard_set("retired", move |path: &Path| {
                let _ = tx.send(path.to_path_buf());
            })
            .unwrap();
            debug_break();
            unreachable!("thread continued after a fault");
        });

        let path = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("persistent guard did not report");
        assert!(path.exists());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("retired-")));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_guard_clear() {
        guard_set("cleared", |_: &Path| {}).unwrap();
        assert_eq!(persistent_spec().map(|s| s.label().to_string()).as_deref(), Some("cleared"));
        guard_clear();
        assert!(persistent_spec().is_none());
    }

    #[test]
    fn test_crash_result_accessors() {
        let done: CrashResult<u8> = CrashResult::Completed(3);
        assert!(!done.is_crash());
        assert_eq!(done.clone().map(|v| v * 2), CrashResult::Completed(6));
        assert_eq!(done.completed(), Some(3));

        let crashed: CrashResult<u8> = CrashResult::CrashDumpGenerated(PathBuf::from("/tmp/x.dump"));
        assert!(crashed.is_crash());
        assert_eq!(crashed.dump_path(), Some(Path::new("/tmp/x.dump")));
        assert_eq!(crashed.completed(), None);
    }
}
