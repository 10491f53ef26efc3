//! Per-thread register save area and stack.

use crate::mem::Stack;

/// Saved execution state of a thread plus the stack it runs on.
///
/// The bootstrap thread runs on the boot stack and owns none.
pub struct ContextStore<C> {
    pub(crate) regs: C,
    stack: Option<Stack>,
}

impl<C: Default> ContextStore<C> {
    pub fn new(stack: Option<Stack>) -> Self {
        Self {
            regs: C::default(),
            stack,
        }
    }
}

impl<C> ContextStore<C> {
    /// Lowest and highest address of the thread's stack memory.
    pub fn stack_bounds(&self) -> Option<(*const u8, *const u8)> {
        self.stack
            .as_ref()
            .map(|stack| (stack.stack_top(), stack.stack_bottom() as *const u8))
    }

    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    /// Detach the stack from the context, leaving the registers behind.
    pub(crate) fn take_stack(&mut self) -> Option<Stack> {
        self.stack.take()
    }

    pub(crate) fn regs_ptr(&mut self) -> *mut C {
        &mut self.regs
    }
}
