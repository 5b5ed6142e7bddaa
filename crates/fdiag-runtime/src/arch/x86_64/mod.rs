//! x86_64 context switching implementation
//!
//! Uses naked functions for the switch itself (stable in Rust 1.88+).

use super::FaultSite;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context (System V AMD64)
#[repr(C)]
#[derive(Debug, Default)]
pub struct FiberRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
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
    // The trampoline is entered by jmp, so rsp must be 16-byte aligned
    // there for the `call` to hand the entry rsp % 16 == 8.
    let aligned_sp = stack_top & !0xF;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = fiber_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0; // terminates frame-pointer walks
    regs.r12 = entry as u64;
    regs.r13 = arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline that calls the entry function with its argument
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!("mov rdi, r13", "call r12", "ud2");
}

/// Save callee-saved registers to `old` and continue from `new`.
///
/// Returns when something later resumes `old`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut FiberRegs, _new: *const FiberRegs) {
    naked_asm!(
        // Save callee-saved registers to old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Return point for the saved context
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
        "mov rsp, [rdi + 0x00]",
        "mov rax, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov rbp, [rdi + 0x18]",
        "mov r12, [rdi + 0x20]",
        "mov r13, [rdi + 0x28]",
        "mov r14, [rdi + 0x30]",
        "mov r15, [rdi + 0x38]",
        "jmp rax",
    );
}

/// Read the faulting registers out of a signal context
///
/// # Safety
///
/// `uc` must be the `ucontext_t` handed to an `SA_SIGINFO` handler.
#[inline]
pub unsafe fn fault_site(uc: *const libc::ucontext_t) -> FaultSite {
    let gregs = &(*uc).uc_mcontext.gregs;
    FaultSite {
        ip: gregs[libc::REG_RIP as usize] as usize,
        sp: gregs[libc::REG_RSP as usize] as usize,
        fp: gregs[libc::REG_RBP as usize] as usize,
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
    // Entered as if by `call`: rsp % 16 == 8 with a null return address.
    let sp = (stack_top & !0xF) - 8;
    core::ptr::write(sp as *mut u64, 0);

    let gregs = &mut (*uc).uc_mcontext.gregs;
    gregs[libc::REG_RSP as usize] = sp as i64;
    gregs[libc::REG_RIP as usize] = entry as i64;
    gregs[libc::REG_RDI as usize] = arg as i64;
    gregs[libc::REG_RBP as usize] = 0;
}

/// Raise SIGILL at the current instruction
#[inline(always)]
pub fn trap() {
    unsafe { core::arch::asm!("ud2", options(nomem, nostack)) };
}
