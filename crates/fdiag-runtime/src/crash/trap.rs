//! Fault trapping for Linux on x86_64 and aarch64
//!
//! A guarded operation runs on its own fiber stack. When it faults, the
//! signal handler records the fault and rewrites the signal context so that
//! returning from the handler lands in `arch::resume` with the guard's saved
//! registers: the thread continues in `run` as if the switch to the fiber
//! had returned. The faulted fiber is abandoned; its stack is unmapped
//! without running any destructor on it.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use fdiag_core::error::{DiagResult, ErrorCode, ErrorLevel, WarningClass};
use fdiag_core::platform::{self, DiagEvent};
use fdiag_core::{config, context, log};

use crate::arch::{self, FaultSite};
use crate::memory::FiberStack;
use crate::{signal, tls};

use super::dump;
use super::frame::{self, signal_name, FaultRecord, GuardFrame, PersistentGuard, GRAVEYARD_STACK_SIZE};
use super::{CrashResult, GuardSpec};

/// Resources a guard needs before it can run anything
pub type Prepared = FiberStack;

pub fn prepare() -> DiagResult<Prepared> {
    signal::install_fault_handlers()?;
    signal::ensure_alt_stack()?;
    FiberStack::new(config::guard_stack_size())
}

/// Operation slot shared between `run` and the fiber
struct Payload<F, R> {
    op: Option<F>,
    outcome: Option<std::thread::Result<R>>,
}

extern "C" fn fiber_entry<F, R>(frame: usize) -> !
where
    F: FnOnce() -> R,
{
    let frame = unsafe { &*(frame as *const GuardFrame) };
    let payload = unsafe { &mut *(frame.payload as *mut Payload<F, R>) };

    if let Some(op) = payload.op.take() {
        payload.outcome = Some(panic::catch_unwind(AssertUnwindSafe(op)));
    }
    frame.state.store(frame::DONE, Ordering::Release);

    unsafe { arch::switch(frame.fiber.get(), frame.host.get()) };
    // Nothing switches back into a finished fiber
    std::process::abort()
}

pub fn run<F, R>(stack: Prepared, label: &str, on_crash: impl FnOnce(&Path), op: F) -> CrashResult<R>
where
    F: FnOnce() -> R,
{
    let depth = context::depth();

    let mut payload = Payload {
        op: Some(op),
        outcome: None,
    };
    let frame = GuardFrame::new(
        &stack,
        tls::active_guard(),
        &mut payload as *mut Payload<F, R> as *mut (),
    );
    unsafe {
        arch::init_fiber(
            frame.fiber.get(),
            stack.top(),
            fiber_entry::<F, R> as usize,
            &frame as *const GuardFrame as usize,
        );
    }

    let prev = tls::set_active_guard(&frame);
    unsafe { arch::switch(frame.host.get(), frame.fiber.get()) };
    tls::set_active_guard(prev);

    if frame.state() == frame::DONE {
        return match payload.outcome.take() {
            Some(Ok(value)) => CrashResult::Completed(value),
            Some(Err(panic)) => panic::resume_unwind(panic),
            None => unreachable!("guarded operation finished without an outcome"),
        };
    }

    let record = frame.fault();
    let path = report_crash(label, &record, depth, on_crash);
    CrashResult::CrashDumpGenerated(path)
}

/// Dump, log, clean up and notify, after leaving signal context
fn report_crash(
    label: &str,
    record: &FaultRecord,
    restore_depth: Option<usize>,
    on_crash: impl FnOnce(&Path),
) -> PathBuf {
    context::reset_after_fault();
    let path = dump::dump_path(&config::dump_dir(), label);
    let frames = context::snapshot();
    if let Err(e) = dump::write_dump(&path, label, record, &frames) {
        log::warn(
            WarningClass::SystemCallFail,
            format_args!("failed to write crash dump {}: {}", path.display(), e),
        );
    }

    log::error(
        ErrorLevel::Error,
        ErrorCode::Exception,
        format_args!(
            "{} in '{}' at {:#x} (ip {:#x}), dump: {}",
            record.signal_name(),
            label,
            record.address,
            record.ip,
            path.display()
        ),
    );

    // Frames pushed by the abandoned operation are never popped
    if let Some(depth) = restore_depth {
        context::truncate(depth);
    }

    on_crash(&path);
    platform::post_event(&DiagEvent::CrashDump { label, path: &path });
    path
}

// ============================================================================
// Persistent guard
// ============================================================================

pub fn guard_set(spec: Arc<GuardSpec>) -> DiagResult<()> {
    signal::install_fault_handlers()?;
    signal::ensure_alt_stack()?;
    let graveyard = FiberStack::new(GRAVEYARD_STACK_SIZE)?;
    let guard = PersistentGuard::new(spec, graveyard, thread_stack_bounds());
    tls::set_persistent_guard(Some(Box::new(guard)));
    Ok(())
}

pub fn guard_clear() {
    tls::set_persistent_guard(None);
}

pub fn persistent_spec() -> Option<Arc<GuardSpec>> {
    tls::persistent_spec()
}

/// Bounds of the calling thread's own stack, `(0, 0)` if unknown
fn thread_stack_bounds() -> (usize, usize) {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return (0, 0);
        }
        let mut addr: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let ok = libc::pthread_attr_getstack(&attr, &mut addr, &mut size) == 0;
        libc::pthread_attr_destroy(&mut attr);
        if ok {
            (addr as usize, addr as usize + size)
        } else {
            (0, 0)
        }
    }
}

/// Where a thread with a persistent guard lands after a fault
///
/// Runs on the guard's private stack; the thread never returns to its own.
extern "C" fn park_faulted_thread(guard: usize) -> ! {
    let guard = unsafe { &*(guard as *const PersistentGuard) };
    let spec = guard.spec.clone();
    let record = guard.fault();

    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        report_crash(spec.label(), &record, None, |path| spec.notify(path));
    }));

    loop {
        std::thread::park();
    }
}

// ============================================================================
// Signal context
// ============================================================================

/// Decide whether a fault belongs to a guard on this thread and, if so,
/// redirect the thread. Returns false for faults we do not own.
///
/// # Safety
///
/// Signal handler only, with the handler's `info` and `uc` arguments.
pub(crate) unsafe fn intercept(sig: i32, info: *mut libc::siginfo_t, uc: *mut libc::ucontext_t) -> bool {
    // Only faults raised by the kernel for an instruction of this thread
    if info.is_null() || uc.is_null() || (*info).si_code <= 0 {
        return false;
    }
    let site = arch::fault_site(uc);
    let code = (*info).si_code;
    let address = (*info).si_addr() as usize;

    let mut current = tls::active_guard();
    while !current.is_null() {
        let frame = &*current;
        if frame.state() == frame::RUNNING && frame.owns(site.sp) {
            frame.record_fault(|record| {
                fill_record(record, sig, code, address, site, frame.stack_usable, frame.stack_hi)
            });
            signal::write_notice(format_args!(
                "{} at {:#x} (ip {:#x}), returning to crash guard",
                signal_name(sig),
                address,
                site.ip
            ));
            arch::redirect(uc, arch::resume as usize, frame.host.get() as usize, frame.stack_hi);
            return true;
        }
        current = frame.prev;
    }

    let persistent = tls::persistent_guard();
    if persistent.is_null() {
        return false;
    }
    let guard = &*persistent;
    if guard.retired.swap(true, Ordering::AcqRel) {
        return false;
    }
    guard.record_fault(|record| {
        fill_record(record, sig, code, address, site, guard.thread_lo, guard.thread_hi)
    });
    signal::write_notice(format_args!(
        "{} at {:#x} (ip {:#x}), retiring thread",
        signal_name(sig),
        address,
        site.ip
    ));
    arch::redirect(
        uc,
        park_faulted_thread as usize,
        persistent as usize,
        guard.graveyard.top(),
    );
    true
}

fn fill_record(
    record: &mut FaultRecord,
    sig: i32,
    code: i32,
    address: usize,
    site: FaultSite,
    stack_lo: usize,
    stack_hi: usize,
) {
    record.signal = sig;
    record.code = code;
    record.address = address;
    record.ip = site.ip;
    record.sp = site.sp;

    // Live frames sit between sp and the top of the stack
    let lo = stack_lo.max(site.sp);
    let count = if lo < stack_hi {
        // [sp, stack_hi) is the live part of a mapped stack
        unsafe { arch::walk_frames(site.fp, lo, stack_hi, record.frames_mut()) }
    } else {
        0
    };
    record.set_frame_count(count);
}
