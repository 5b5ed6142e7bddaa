//! Per-guard bookkeeping shared with the signal handler
//!
//! Everything here is touched from signal context, so it is plain data:
//! no locks, no allocation, atomics for the handoff.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::arch::FiberRegs;
use crate::memory::FiberStack;

use super::GuardSpec;

/// Return addresses kept per fault
pub const MAX_FRAMES: usize = 32;

/// What the signal handler saw
#[derive(Debug, Clone, Copy)]
pub struct FaultRecord {
    pub signal: i32,
    pub code: i32,
    pub address: usize,
    pub ip: usize,
    pub sp: usize,
    frames: [usize; MAX_FRAMES],
    frame_count: usize,
}

impl FaultRecord {
    pub const fn empty() -> Self {
        Self {
            signal: 0,
            code: 0,
            address: 0,
            ip: 0,
            sp: 0,
            frames: [0; MAX_FRAMES],
            frame_count: 0,
        }
    }

    /// Recorded return addresses, innermost first
    #[inline]
    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.frame_count]
    }

    pub fn frames_mut(&mut self) -> &mut [usize; MAX_FRAMES] {
        &mut self.frames
    }

    pub fn set_frame_count(&mut self, count: usize) {
        self.frame_count = count.min(MAX_FRAMES);
    }

    /// `SIGSEGV` style name
    pub fn signal_name(&self) -> &'static str {
        signal_name(self.signal)
    }
}

/// Name of a signal number, without allocating
pub fn signal_name(signal: i32) -> &'static str {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str())
        .unwrap_or("SIGUNKNOWN")
}

// ============================================================================
// Scoped guard frame
// ============================================================================

pub const RUNNING: u8 = 0;
pub const DONE: u8 = 1;
pub const FAULTED: u8 = 2;

/// One active `guard` call, living on the caller's stack
#[repr(C)]
pub(crate) struct GuardFrame {
    /// Caller context, resumed on completion or fault
    pub host: UnsafeCell<FiberRegs>,
    /// Operation context on the fiber stack
    pub fiber: UnsafeCell<FiberRegs>,
    pub state: AtomicU8,
    /// Mapping of the fiber stack, guard page included
    pub stack_lo: usize,
    pub stack_usable: usize,
    pub stack_hi: usize,
    /// Enclosing guard on this thread
    pub prev: *const GuardFrame,
    /// Type-erased operation slot read by the fiber entry
    pub payload: *mut (),
    fault: UnsafeCell<FaultRecord>,
}

impl GuardFrame {
    pub fn new(stack: &FiberStack, prev: *const GuardFrame, payload: *mut ()) -> Self {
        Self {
            host: UnsafeCell::new(FiberRegs::default()),
            fiber: UnsafeCell::new(FiberRegs::default()),
            state: AtomicU8::new(RUNNING),
            stack_lo: stack.base(),
            stack_usable: stack.bottom(),
            stack_hi: stack.top(),
            prev,
            payload,
            fault: UnsafeCell::new(FaultRecord::empty()),
        }
    }

    #[inline]
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn owns(&self, sp: usize) -> bool {
        sp >= self.stack_lo && sp < self.stack_hi
    }

    /// Signal context only: fill the record and mark the frame faulted
    ///
    /// # Safety
    ///
    /// Called on the owning thread while the fiber is suspended by a signal.
    pub unsafe fn record_fault(&self, fill: impl FnOnce(&mut FaultRecord)) {
        fill(&mut *self.fault.get());
        self.state.store(FAULTED, Ordering::Release);
    }

    pub fn fault(&self) -> FaultRecord {
        // The handler finished writing before the state turned FAULTED.
        unsafe { *self.fault.get() }
    }
}

// ============================================================================
// Persistent guard
// ============================================================================

/// Stack the retired thread runs on after a fault outside any `guard`
pub const GRAVEYARD_STACK_SIZE: usize = 256 * 1024;

/// A thread's `guard_set` registration
pub(crate) struct PersistentGuard {
    pub spec: Arc<GuardSpec>,
    pub graveyard: FiberStack,
    /// The thread's own stack, bounds for the frame walk (0..0 if unknown)
    pub thread_lo: usize,
    pub thread_hi: usize,
    /// Set once the thread has been redirected; a second fault is not ours
    pub retired: AtomicBool,
    fault: UnsafeCell<FaultRecord>,
}

impl PersistentGuard {
    pub fn new(spec: Arc<GuardSpec>, graveyard: FiberStack, thread_stack: (usize, usize)) -> Self {
        Self {
            spec,
            graveyard,
            thread_lo: thread_stack.0,
            thread_hi: thread_stack.1,
            retired: AtomicBool::new(false),
            fault: UnsafeCell::new(FaultRecord::empty()),
        }
    }

    /// Signal context only
    ///
    /// # Safety
    ///
    /// As for [`GuardFrame::record_fault`].
    pub unsafe fn record_fault(&self, fill: impl FnOnce(&mut FaultRecord)) {
        fill(&mut *self.fault.get());
    }

    pub fn fault(&self) -> FaultRecord {
        unsafe { *self.fault.get() }
    }
}
