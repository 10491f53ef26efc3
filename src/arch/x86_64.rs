//! x86_64 host implementation (System V ABI, Linux).
//!
//! Lets the runtime run for real under the test harness: threads get their
//! own heap stacks and switch between each other on top of a single OS
//! thread. Interrupts do not exist on the host and are always reported as
//! enabled.

use super::{Arch, StartFn};
use core::arch::global_asm;

/// Saved thread context: stack pointer plus the callee-saved registers.
#[repr(C)]
#[derive(Debug, Default)]
pub struct HostContext {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

global_asm!(
    ".text",
    ".p2align 4",
    // rdi = prev, rsi = next
    ".global __cothread_switch_x86_64",
    ".type __cothread_switch_x86_64, @function",
    "__cothread_switch_x86_64:",
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], rbp",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], r12",
    "mov [rdi + 0x20], r13",
    "mov [rdi + 0x28], r14",
    "mov [rdi + 0x30], r15",
    "mov rsp, [rsi + 0x00]",
    "mov rbp, [rsi + 0x08]",
    "mov rbx, [rsi + 0x10]",
    "mov r12, [rsi + 0x18]",
    "mov r13, [rsi + 0x20]",
    "mov r14, [rsi + 0x28]",
    "mov r15, [rsi + 0x30]",
    // Suspended thread: back into its call. Fresh thread: into the entry stub.
    "ret",
    ".size __cothread_switch_x86_64, . - __cothread_switch_x86_64",
    // First run of a context: r12 = argument, r13 = start routine
    ".global __cothread_entry_x86_64",
    ".type __cothread_entry_x86_64, @function",
    "__cothread_entry_x86_64:",
    "mov rdi, r12",
    "call r13",
    "ud2",
    ".size __cothread_entry_x86_64, . - __cothread_entry_x86_64",
);

extern "C" {
    fn __cothread_switch_x86_64(prev: *mut HostContext, next: *const HostContext);
    fn __cothread_entry_x86_64();
}

/// Host architecture implementation.
pub struct HostArch;

impl Arch for HostArch {
    type SavedContext = HostContext;

    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { __cothread_switch_x86_64(prev, next) }
    }

    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        start: StartFn,
        arg: usize,
    ) {
        // The entry stub address sits where `ret` will pop it. After the pop
        // rsp is 16-byte aligned, as required right before a `call`.
        let slot = ((stack_top as usize) & !15) - 8;
        unsafe {
            (slot as *mut u64).write(__cothread_entry_x86_64 as unsafe extern "C" fn() as usize as u64);
        }

        *ctx = HostContext {
            rsp: slot as u64,
            r12: arg as u64,
            r13: start as usize as u64,
            ..HostContext::default()
        };
    }

    fn enable_interrupts() {}

    fn disable_interrupts() {}

    fn interrupts_enabled() -> bool {
        true
    }

    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}
