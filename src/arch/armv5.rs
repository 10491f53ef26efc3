//! ARMv5TE (ARM946E-S) architecture implementation.
//!
//! A cooperative switch happens at a function call boundary, so only the
//! AAPCS callee-saved registers (r4-r11), the stack pointer and the return
//! address need to be preserved. All routines are assembled in ARM state so
//! they can be called from either ARM or Thumb code.

use super::{Arch, StartFn};
use core::arch::global_asm;

/// Saved thread context for ARMv5TE.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Armv5Context {
    /// Callee-saved registers r4-r11
    pub r: [u32; 8],
    /// Stack pointer (r13)
    pub sp: u32,
    /// Resume address (r14)
    pub lr: u32,
}

/// CPSR IRQ mask bit.
const CPSR_I: u32 = 1 << 7;

global_asm!(
    ".section .text.cothread,\"ax\",%progbits",
    ".arm",
    ".p2align 2",
    // r0 = prev, r1 = next
    ".global __cothread_switch_armv5",
    ".type __cothread_switch_armv5, %function",
    "__cothread_switch_armv5:",
    "stmia r0, {{r4-r11}}",
    "str sp, [r0, #32]",
    "str lr, [r0, #36]",
    "ldmia r1, {{r4-r11}}",
    "ldr sp, [r1, #32]",
    "ldr lr, [r1, #36]",
    "bx lr",
    ".size __cothread_switch_armv5, . - __cothread_switch_armv5",
    // First run of a context: r4 = argument, r5 = start routine
    ".global __cothread_entry_armv5",
    ".type __cothread_entry_armv5, %function",
    "__cothread_entry_armv5:",
    "mov r0, r4",
    "blx r5",
    "1:",
    "b 1b",
    ".size __cothread_entry_armv5, . - __cothread_entry_armv5",
    // Returns the previous CPSR and masks IRQs
    ".global __cothread_irq_save_armv5",
    ".type __cothread_irq_save_armv5, %function",
    "__cothread_irq_save_armv5:",
    "mrs r0, cpsr",
    "orr r1, r0, #0x80",
    "msr cpsr_c, r1",
    "bx lr",
    ".size __cothread_irq_save_armv5, . - __cothread_irq_save_armv5",
    ".global __cothread_irq_enable_armv5",
    ".type __cothread_irq_enable_armv5, %function",
    "__cothread_irq_enable_armv5:",
    "mrs r0, cpsr",
    "bic r0, r0, #0x80",
    "msr cpsr_c, r0",
    "bx lr",
    ".size __cothread_irq_enable_armv5, . - __cothread_irq_enable_armv5",
    ".global __cothread_cpsr_armv5",
    ".type __cothread_cpsr_armv5, %function",
    "__cothread_cpsr_armv5:",
    "mrs r0, cpsr",
    "bx lr",
    ".size __cothread_cpsr_armv5, . - __cothread_cpsr_armv5",
    // CP15 wait-for-interrupt
    ".global __cothread_halt_armv5",
    ".type __cothread_halt_armv5, %function",
    "__cothread_halt_armv5:",
    "mov r0, #0",
    "mcr p15, 0, r0, c7, c0, 4",
    "bx lr",
    ".size __cothread_halt_armv5, . - __cothread_halt_armv5",
    ".text",
);

extern "C" {
    fn __cothread_switch_armv5(prev: *mut Armv5Context, next: *const Armv5Context);
    fn __cothread_entry_armv5();
    fn __cothread_irq_save_armv5() -> u32;
    fn __cothread_irq_enable_armv5();
    fn __cothread_cpsr_armv5() -> u32;
    fn __cothread_halt_armv5();
}

/// ARMv5TE architecture implementation.
pub struct Armv5Arch;

impl Arch for Armv5Arch {
    type SavedContext = Armv5Context;

    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { __cothread_switch_armv5(prev, next) }
    }

    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        start: StartFn,
        arg: usize,
    ) {
        // AAPCS requires 8-byte stack alignment at public interfaces
        let sp = (stack_top as usize) & !7;

        ctx.r = [0; 8];
        ctx.r[0] = arg as u32;
        ctx.r[1] = start as usize as u32;
        ctx.sp = sp as u32;
        ctx.lr = __cothread_entry_armv5 as unsafe extern "C" fn() as usize as u32;
    }

    fn enable_interrupts() {
        unsafe { __cothread_irq_enable_armv5() }
    }

    fn disable_interrupts() {
        unsafe {
            __cothread_irq_save_armv5();
        }
    }

    fn interrupts_enabled() -> bool {
        let cpsr = unsafe { __cothread_cpsr_armv5() };
        cpsr & CPSR_I == 0
    }

    fn wait_for_interrupt() {
        unsafe { __cothread_halt_armv5() }
    }
}
