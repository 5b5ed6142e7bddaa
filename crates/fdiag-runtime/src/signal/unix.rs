//! Unix signal handling for crash guards

use std::cell::RefCell;
use std::fmt;
use std::sync::OnceLock;

use fdiag_core::error::{DiagError, DiagResult};
use fdiag_core::log::buffer;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::memory::FiberStack;

/// Signals a crash guard intercepts
pub const FAULT_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGTRAP,
];

/// Alternate stack installed for threads that have none
pub const ALT_STACK_SIZE: usize = 64 * 1024;

/// An existing alternate stack smaller than this is replaced
const MIN_ALT_STACK_SIZE: usize = 16 * 1024;

/// Handlers that were installed before ours, per `FAULT_SIGNALS` index
static PREVIOUS: [OnceLock<SigAction>; 5] = [const { OnceLock::new() }; 5];

static INSTALLED: OnceLock<DiagResult<()>> = OnceLock::new();

/// Install the fault handler for every signal in `FAULT_SIGNALS`
///
/// Runs once per process; later calls return the first outcome.
pub fn install_fault_handlers() -> DiagResult<()> {
    INSTALLED.get_or_init(install_all).clone()
}

fn install_all() -> DiagResult<()> {
    let action = SigAction::new(
        SigHandler::SigAction(handle_fault),
        SaFlags::SA_SIGINFO | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    for (index, signal) in FAULT_SIGNALS.iter().enumerate() {
        let previous = unsafe { sigaction(*signal, &action) }
            .map_err(|_| DiagError::SignalSetupFailed(*signal as i32))?;
        let _ = PREVIOUS[index].set(previous);
    }
    Ok(())
}

extern "C" fn handle_fault(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let errno = unsafe { *libc::__errno_location() };

    let handled = unsafe { crate::crash::intercept(sig, info, ctx as *mut libc::ucontext_t) };
    if !handled {
        unsafe { forward(sig, info, ctx) };
    }

    unsafe { *libc::__errno_location() = errno };
}

/// Hand a fault we do not own to whoever had the signal before us
unsafe fn forward(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let previous = FAULT_SIGNALS
        .iter()
        .position(|s| *s as i32 == sig)
        .and_then(|index| PREVIOUS[index].get());
    let sent = info.is_null() || (*info).si_code <= 0;

    match previous.map(SigAction::handler) {
        Some(SigHandler::SigAction(f)) => f(sig, info, ctx),
        Some(SigHandler::Handler(f)) => f(sig),
        Some(SigHandler::SigIgn) if sent => {}
        _ => {
            // A kernel fault re-triggers on return; a sent signal must be re-raised.
            libc::signal(sig, libc::SIG_DFL);
            if sent {
                libc::raise(sig);
            }
        }
    }
}

/// Write one line to fd 2 from signal context (fixed buffer, no allocation)
pub fn write_notice(args: fmt::Arguments<'_>) {
    let mut buf = [0u8; 256];
    buffer::format_line(&mut buf, format_args!("fdiag: "), args, 0, |line| unsafe {
        libc::write(2, line.as_ptr().cast(), line.len());
    });
}

// ============================================================================
// Alternate signal stack
// ============================================================================

enum AltStack {
    /// The thread already had a large enough one (e.g. from std)
    Foreign,
    Owned(FiberStack),
}

impl Drop for AltStack {
    fn drop(&mut self) {
        if let AltStack::Owned(stack) = self {
            if let Ok(current) = current_alt_stack() {
                if current.ss_sp as usize == stack.bottom() {
                    let disable = libc::stack_t {
                        ss_sp: std::ptr::null_mut(),
                        ss_flags: libc::SS_DISABLE,
                        ss_size: 0,
                    };
                    unsafe { libc::sigaltstack(&disable, std::ptr::null_mut()) };
                }
            }
        }
    }
}

thread_local! {
    static ALT_STACK: RefCell<Option<AltStack>> = const { RefCell::new(None) };
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn current_alt_stack() -> DiagResult<libc::stack_t> {
    let mut current: libc::stack_t = unsafe { std::mem::zeroed() };
    if unsafe { libc::sigaltstack(std::ptr::null(), &mut current) } != 0 {
        return Err(DiagError::AltStackFailed(last_errno()));
    }
    Ok(current)
}

/// Make sure the calling thread has an alternate signal stack
pub fn ensure_alt_stack() -> DiagResult<()> {
    ALT_STACK
        .try_with(|slot| {
            let mut slot = slot
                .try_borrow_mut()
                .map_err(|_| DiagError::AltStackFailed(libc::EBUSY))?;
            if slot.is_some() {
                return Ok(());
            }

            let current = current_alt_stack()?;
            if current.ss_flags & libc::SS_DISABLE == 0 && current.ss_size >= MIN_ALT_STACK_SIZE {
                *slot = Some(AltStack::Foreign);
                return Ok(());
            }

            let stack = FiberStack::new(ALT_STACK_SIZE)?;
            let install = libc::stack_t {
                ss_sp: stack.bottom() as *mut libc::c_void,
                ss_flags: 0,
                ss_size: stack.size(),
            };
            if unsafe { libc::sigaltstack(&install, std::ptr::null_mut()) } != 0 {
                return Err(DiagError::AltStackFailed(last_errno()));
            }
            *slot = Some(AltStack::Owned(stack));
            Ok(())
        })
        .unwrap_or(Err(DiagError::AltStackFailed(libc::ESRCH)))
}
