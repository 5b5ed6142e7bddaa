//! Per-thread error context stack
//!
//! Code pushes named frames around an operation ("loading config",
//! "parsing entry 12") so that a later warning or error can say what the
//! thread was doing. Each thread gets a bounded stack on first use; the
//! capacity is taken from configuration at that moment.
//!
//! ```ignore
//! use fdiag_core::context;
//!
//! let _frame = context::scope("loading config", path.display().to_string());
//! // ... warnings/errors logged here carry "When loading config: <path>"
//! ```

use std::borrow::Cow;
use std::cell::{Cell, UnsafeCell};

use crate::config;
use crate::error::ErrorLevel;
use crate::log::{self, Stream};

/// One diagnostic breadcrumb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub name: Cow<'static, str>,
    pub data: Cow<'static, str>,
}

impl ErrorFrame {
    pub fn new(name: impl Into<Cow<'static, str>>, data: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Bounded stack of frames owned by one thread
#[derive(Debug, Clone)]
pub struct ErrorContext {
    frames: Vec<ErrorFrame>,
    capacity: usize,
}

impl ErrorContext {
    /// Empty stack holding at most `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of live frames
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live frames, oldest first
    #[inline]
    pub fn frames(&self) -> &[ErrorFrame] {
        &self.frames
    }

    #[inline]
    pub fn frame(&self, index: usize) -> Option<&ErrorFrame> {
        self.frames.get(index)
    }

    /// Append a frame; refused (returns false) when full
    pub fn push(&mut self, frame: ErrorFrame) -> bool {
        if self.frames.len() >= self.capacity {
            return false;
        }
        self.frames.push(frame);
        true
    }

    /// Drop the newest frame, if any
    pub fn pop(&mut self) -> Option<ErrorFrame> {
        self.frames.pop()
    }

    /// Drop frames above `depth`
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }
}

/// Thread's stack plus a busy flag standing in for a borrow.
///
/// A `RefCell` borrow taken by code that then faults inside a crash guard
/// is never released. The flag can be cleared by [`reset_after_fault`].
struct Slot {
    busy: Cell<bool>,
    ctx: UnsafeCell<Option<ErrorContext>>,
}

thread_local! {
    static CONTEXT: Slot = const {
        Slot {
            busy: Cell::new(false),
            ctx: UnsafeCell::new(None),
        }
    };
}

/// Exclusive access to this thread's stack, created on first use.
///
/// `f` is crate code only and never reenters this module.
fn with_slot<R>(f: impl FnOnce(&mut ErrorContext) -> R) -> Option<R> {
    if !config::error_context_enabled() {
        return None;
    }
    CONTEXT
        .try_with(|slot| {
            if slot.busy.replace(true) {
                return None;
            }
            // SAFETY: the busy flag grants exclusive access until reset
            let ctx = unsafe { &mut *slot.ctx.get() }.get_or_insert_with(new_context);
            let result = f(ctx);
            slot.busy.set(false);
            Some(result)
        })
        .ok()
        .flatten()
}

/// Run `f` on a copy of this thread's context stack, created on first use.
///
/// `f` receives `None` when tracking is disabled in configuration.
pub fn with_current<R>(f: impl FnOnce(Option<&ErrorContext>) -> R) -> R {
    let copy = with_slot(|ctx| ctx.clone());
    f(copy.as_ref())
}

fn new_context() -> ErrorContext {
    ErrorContext::with_capacity(config::error_context_depth())
}

/// Release the calling thread's stack after a fault abandoned code that was
/// in the middle of using it
pub fn reset_after_fault() {
    let _ = CONTEXT.try_with(|slot| slot.busy.set(false));
}

/// Push a frame onto the calling thread's stack.
///
/// Returns false when the frame was not recorded: tracking disabled or the
/// stack is at capacity. Context is best-effort.
pub fn push(name: impl Into<Cow<'static, str>>, data: impl Into<Cow<'static, str>>) -> bool {
    let frame = ErrorFrame::new(name, data);
    with_slot(|ctx| ctx.push(frame)).unwrap_or(false)
}

/// Pop the newest frame of the calling thread's stack
pub fn pop() {
    let _ = with_slot(|ctx| ctx.pop());
}

/// Current depth, `None` when tracking is disabled
pub fn depth() -> Option<usize> {
    with_slot(|ctx| ctx.depth())
}

/// Discard frames above `depth` (frames abandoned by a faulted operation)
pub fn truncate(depth: usize) {
    let _ = with_slot(|ctx| ctx.truncate(depth));
}

/// Copy of the live frames, oldest first
pub fn snapshot() -> Vec<ErrorFrame> {
    with_slot(|ctx| ctx.frames().to_vec()).unwrap_or_default()
}

/// Frame pushed for the lifetime of the guard
#[must_use = "the frame is popped when the scope guard is dropped"]
pub struct ContextScope {
    pushed: bool,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if self.pushed {
            pop();
        }
    }
}

/// Push a frame that pops itself when the returned guard drops
pub fn scope(name: impl Into<Cow<'static, str>>, data: impl Into<Cow<'static, str>>) -> ContextScope {
    ContextScope {
        pushed: push(name, data),
    }
}

/// Log every live frame as "When <name>: <data>", oldest first
pub fn render(level: ErrorLevel) {
    for frame in snapshot() {
        let name: &str = if frame.name.is_empty() {
            "<something>"
        } else {
            &frame.name
        };
        log::emit(
            level,
            "",
            format_args!("When {}: {}", name, frame.data),
            Some(Stream::Stderr),
        );
    }
}
