//! Threads that inherit the spawning thread's persistent crash guard

use std::io;
use std::thread::{Builder, JoinHandle};

use fdiag_core::error::WarningClass;
use fdiag_core::log;

use crate::crash::{self, CrashResult};

/// Spawn a named OS thread.
///
/// When the calling thread has a persistent guard (see
/// [`crash::guard_set`]), the new thread gets the same guard and runs `f`
/// under [`crash::guard`]: a fault inside `f` is reported through the
/// guard's callback and surfaces as `CrashDumpGenerated` from `join`.
/// Otherwise `f` runs unguarded and completes normally or panics.
pub fn spawn<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<CrashResult<T>>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let inherited = crash::persistent_spec();
    Builder::new().name(name.into()).spawn(move || match inherited {
        Some(spec) => {
            if let Err(e) = crash::guard_set_spec(spec.clone()) {
                log::warn(
                    WarningClass::SystemCallFail,
                    format_args!("thread did not inherit persistent guard '{}': {}", spec.label(), e),
                );
            }
            crash::guard(spec.label(), |path| spec.notify(path), f)
        }
        None => CrashResult::Completed(f()),
    })
}

#[cfg(all(test, target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_unguarded_spawn_completes() {
        let handle = std::thread::spawn(|| spawn("plain", || 6 * 7).unwrap().join().unwrap());
        assert_eq!(handle.join().unwrap(), CrashResult::Completed(42));
    }

    #[test]
    fn test_spawn_inherits_persistent_guard() {
        if crate::debugger_attached() {
            return;
        }
        let (tx, rx) = mpsc::channel::<PathBuf>();

        let parent = std::thread::spawn(move || {
            let tx = Mutex::new(tx);
            crash::guard_set("inherited", move |path: &Path| {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(path.to_path_buf());
                }
            })
            .unwrap();

            let child = spawn("guarded-child", || {
                assert_eq!(
                    crash::persistent_spec().map(|s| s.label().to_string()).as_deref(),
                    Some("inherited")
                );
                crash::debug_break();
            })
            .unwrap();
            let result = child.join().unwrap();

            let fine = spawn("fine-child", || "ok").unwrap().join().unwrap();
            crash::guard_clear();
            (result, fine)
        });

        let (result, fine) = parent.join().unwrap();
        assert_eq!(fine, CrashResult::Completed("ok"));

        let path = result.dump_path().expect("child crash reported").to_path_buf();
        let notified = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("callback did not fire");
        assert_eq!(notified, path);
        assert!(path.exists());
        let _ = std::fs::remove_file(path);

        // One crash, one callback
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_guard_not_inherited_after_clear() {
        let spec = std::thread::spawn(|| {
            crash::guard_set("temporary", |_: &Path| {}).unwrap();
            crash::guard_clear();
            spawn("after-clear", crash::persistent_spec).unwrap().join().unwrap()
        })
        .join()
        .unwrap();
        assert!(matches!(spec, CrashResult::Completed(None)));
    }
}
