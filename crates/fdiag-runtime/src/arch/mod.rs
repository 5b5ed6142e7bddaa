//! Architecture-specific context switching
//!
//! Each architecture provides:
//! - `FiberRegs` - callee-saved register block, `repr(C)`
//! - `init_fiber` / `switch` / `resume` - hand-written context switch
//! - `fault_site` / `redirect` - reading and rewriting a signal `ucontext`
//! - `trap` - the deliberate-fault instruction

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::*;
    }
}

/// Registers of interest at the faulting instruction
#[derive(Debug, Clone, Copy)]
pub struct FaultSite {
    pub ip: usize,
    pub sp: usize,
    pub fp: usize,
}

/// Follow the frame-pointer chain starting at `fp`, storing return
/// addresses into `out`. Only frames inside `[lo, hi)` are read.
///
/// Both supported ABIs lay a frame record out as `[prev fp, return addr]`.
///
/// # Safety
///
/// `[lo, hi)` must be mapped readable memory.
pub unsafe fn walk_frames(mut fp: usize, lo: usize, hi: usize, out: &mut [usize]) -> usize {
    const WORD: usize = core::mem::size_of::<usize>();
    let mut count = 0;
    while count < out.len() && fp >= lo && fp % WORD == 0 && fp.saturating_add(2 * WORD) <= hi {
        let ret = core::ptr::read_volatile((fp + WORD) as *const usize);
        if ret == 0 {
            break;
        }
        out[count] = ret;
        count += 1;

        let next = core::ptr::read_volatile(fp as *const usize);
        // The chain must move toward the stack top.
        if next <= fp {
            break;
        }
        fp = next;
    }
    count
}
