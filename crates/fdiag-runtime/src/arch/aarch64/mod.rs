//! aarch64 context switching implementation

use super::FaultSite;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context (AAPCS64)
#[repr(C)]
#[derive(Debug, Default)]
pub struct FiberRegs {
    pub sp: u64,        // 0x00
    pub pc: u64,        // 0x08
    pub x19: [u64; 10], // 0x10 (x19-x28)
    pub fp: u64,        // 0x60 (x29)
    pub lr: u64,        // 0x68 (x30)
    pub d8: [u64; 8],   // 0x70 (d8-d15)
}

/// Initialize a fiber context
///
/// When switched to, execution begins at `entry(arg)` on the stack ending at
/// `stack_top`. `entry` must never return.
///
/// # Safety
///
/// `regs` must point to valid FiberRegs memory and `stack_top` to the end of
/// a mapped stack.
#[inline]
pub unsafe fn init_fiber(regs: *mut FiberRegs, stack_top: usize, entry: usize, arg: usize) {
    let regs = &mut *regs;
    *regs = FiberRegs::default();
    regs.sp = (stack_top & !0xF) as u64;
    regs.pc = fiber_trampoline as usize as u64;
    regs.x19[0] = entry as u64;
    regs.x19[1] = arg as u64;
}

/// Trampoline that calls the entry function (x19) with its argument (x20)
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!("mov x0, x20", "blr x19", "brk #1");
}

/// Save callee-saved registers to `old` and continue from `new`.
///
/// Returns when something later resumes `old`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut FiberRegs, _new: *const FiberRegs) {
    naked_asm!(
        // Save into old (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "adr x10, 1f",
        "str x10, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        // Load from new (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x10, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "br x10",
        // Return point for the saved context (x30 restored above)
        "1:",
        "ret",
    );
}

/// Continue from `regs` without saving anything.
///
/// Target of a signal-context redirect: the faulted stream is abandoned.
#[unsafe(naked)]
pub unsafe extern "C" fn resume(_regs: *const FiberRegs) -> ! {
    naked_asm!(
        "ldr x9, [x0, #0x00]",
        "mov sp, x9",
        "ldr x10, [x0, #0x08]",
        "ldp x19, x20, [x0, #0x10]",
        "ldp x21, x22, [x0, #0x20]",
        "ldp x23, x24, [x0, #0x30]",
        "ldp x25, x26, [x0, #0x40]",
        "ldp x27, x28, [x0, #0x50]",
        "ldp x29, x30, [x0, #0x60]",
        "ldp d8, d9, [x0, #0x70]",
        "ldp d10, d11, [x0, #0x80]",
        "ldp d12, d13, [x0, #0x90]",
        "ldp d14, d15, [x0, #0xa0]",
        "br x10",
    );
}

/// Read the faulting registers out of a signal context
///
/// # Safety
///
/// `uc` must be the `ucontext_t` handed to an `SA_SIGINFO` handler.
#[inline]
pub unsafe fn fault_site(uc: *const libc::ucontext_t) -> FaultSite {
    let mc = &(*uc).uc_mcontext;
    FaultSite {
        ip: mc.pc as usize,
        sp: mc.sp as usize,
        fp: mc.regs[29] as usize,
    }
}

/// Rewrite a signal context so that returning from the handler calls
/// `entry(arg)` on the stack ending at `stack_top`.
///
/// # Safety
///
/// `uc` as for [`fault_site`]; `stack_top` must end a mapped, writable stack
/// that nothing else is using.
pub unsafe fn redirect(uc: *mut libc::ucontext_t, entry: usize, arg: usize, stack_top: usize) {
    let mc = &mut (*uc).uc_mcontext;
    mc.sp = (stack_top & !0xF) as u64;
    mc.pc = entry as u64;
    mc.regs[0] = arg as u64;
    mc.regs[29] = 0;
    mc.regs[30] = 0;
}

/// Raise SIGILL at the current instruction
#[inline(always)]
pub fn trap() {
    unsafe { core::arch::asm!("udf #0", options(nomem, nostack)) };
}
