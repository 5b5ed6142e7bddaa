//! Thread-local crash guard state
//!
//! The signal handler reads these cells, so they use const initializers
//! and hold raw pointers only. Ownership of the persistent guard lives in a
//! separate slot that the handler never touches.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::crash::frame::{GuardFrame, PersistentGuard};
use crate::crash::GuardSpec;

thread_local! {
    /// Innermost active `guard` call on this thread
    static ACTIVE_GUARD: Cell<*const GuardFrame> = const { Cell::new(std::ptr::null()) };

    /// This thread's persistent guard, if any
    static PERSISTENT_PTR: Cell<*const PersistentGuard> = const { Cell::new(std::ptr::null()) };

    static PERSISTENT: RefCell<PersistentHolder> = const { RefCell::new(PersistentHolder(None)) };
}

/// Owner of the persistent guard. Unpublishes the handler's pointer before
/// the guard is freed, thread-local teardown included.
struct PersistentHolder(Option<Box<PersistentGuard>>);

impl Drop for PersistentHolder {
    fn drop(&mut self) {
        if let Some(guard) = self.0.as_deref() {
            let owned = guard as *const PersistentGuard;
            let _ = PERSISTENT_PTR.try_with(|cell| {
                if cell.get() == owned {
                    cell.set(std::ptr::null());
                }
            });
        }
    }
}

/// Innermost active guard frame (null when none)
#[inline]
pub(crate) fn active_guard() -> *const GuardFrame {
    ACTIVE_GUARD.try_with(Cell::get).unwrap_or(std::ptr::null())
}

/// Make `frame` the innermost guard, returning the previous one
#[inline]
pub(crate) fn set_active_guard(frame: *const GuardFrame) -> *const GuardFrame {
    ACTIVE_GUARD
        .try_with(|cell| cell.replace(frame))
        .unwrap_or(std::ptr::null())
}

/// Check if a `guard` call is active on this thread
#[inline]
pub fn in_guard() -> bool {
    !active_guard().is_null()
}

/// Persistent guard for the signal handler (null when none)
#[inline]
pub(crate) fn persistent_guard() -> *const PersistentGuard {
    PERSISTENT_PTR.try_with(Cell::get).unwrap_or(std::ptr::null())
}

/// Install (or with `None` remove) this thread's persistent guard
pub(crate) fn set_persistent_guard(guard: Option<Box<PersistentGuard>>) {
    let ptr = guard
        .as_deref()
        .map_or(std::ptr::null(), |g| g as *const PersistentGuard);
    // Unpublish before the old box drops, publish after the new one is stored.
    let _ = PERSISTENT_PTR.try_with(|cell| cell.set(std::ptr::null()));
    let stored = PERSISTENT
        .try_with(|slot| match slot.try_borrow_mut() {
            Ok(mut slot) => {
                // The old holder's drop sees the pointer already cleared
                *slot = PersistentHolder(guard);
                true
            }
            Err(_) => false,
        })
        .unwrap_or(false);
    if stored && !ptr.is_null() {
        let _ = PERSISTENT_PTR.try_with(|cell| cell.set(ptr));
    }
}

/// Spec of this thread's persistent guard, for inheritance by spawned threads
pub(crate) fn persistent_spec() -> Option<Arc<GuardSpec>> {
    PERSISTENT
        .try_with(|slot| {
            slot.try_borrow()
                .ok()
                .and_then(|holder| holder.0.as_ref().map(|g| g.spec.clone()))
        })
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::frame::GRAVEYARD_STACK_SIZE;
    use crate::memory::FiberStack;

    fn persistent_guard_for_test(label: &str) -> Box<PersistentGuard> {
        let spec = Arc::new(GuardSpec::new(label, |_| {}));
        let graveyard = FiberStack::new(GRAVEYARD_STACK_SIZE).unwrap();
        Box::new(PersistentGuard::new(spec, graveyard, (0, 0)))
    }

    #[test]
    fn test_set_and_clear_publish_pointer() {
        std::thread::spawn(|| {
            assert!(persistent_guard().is_null());
            set_persistent_guard(Some(persistent_guard_for_test("published")));
            assert!(!persistent_guard().is_null());
            assert_eq!(persistent_spec().map(|s| s.label().to_string()).as_deref(), Some("published"));

            set_persistent_guard(None);
            assert!(persistent_guard().is_null());
            assert!(persistent_spec().is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_dropping_holder_unpublishes_pointer() {
        std::thread::spawn(|| {
            let holder = PersistentHolder(Some(persistent_guard_for_test("teardown")));
            let ptr = holder.0.as_deref().map_or(std::ptr::null(), |g| g as *const PersistentGuard);
            PERSISTENT_PTR.with(|cell| cell.set(ptr));

            drop(holder);
            assert!(persistent_guard().is_null());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_dropping_stale_holder_keeps_current_pointer() {
        std::thread::spawn(|| {
            set_persistent_guard(Some(persistent_guard_for_test("current")));
            let current = persistent_guard();

            drop(PersistentHolder(Some(persistent_guard_for_test("stale"))));
            assert_eq!(persistent_guard(), current);
            set_persistent_guard(None);
        })
        .join()
        .unwrap();
    }
}
