//! Architecture abstraction layer for context switching and interrupt masking.
//!
//! This module provides a unified interface for the architecture-specific
//! operations the scheduler needs. Everything else in the crate handles
//! threads through control blocks and never touches raw register state.

use core::marker::PhantomData;

/// Entry routine of a freshly created context.
///
/// The argument is the value passed to [`Arch::init_context`]. The routine
/// must never return: there is no caller frame to return into.
pub type StartFn = extern "C" fn(usize) -> !;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations of this trait involve direct hardware manipulation and
/// inline assembly. All methods marked as unsafe have specific preconditions
/// that must be upheld by the caller.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// Holds every register that defines a suspended thread's resumable
    /// execution point.
    type SavedContext: Send + Default;

    /// Save the running thread's registers into `prev` and resume `next`.
    ///
    /// Returns when some other thread switches back to `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must point to a valid, writable SavedContext
    /// - `next` must point to a SavedContext that was either filled by
    ///   `init_context` or by an earlier `context_switch`
    /// - Both must stay valid until the switch has completed
    /// - Must be called with interrupts disabled
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prepare `ctx` so that switching to it calls `start(arg)` on the stack
    /// that ends at `stack_top` (highest address, exclusive).
    ///
    /// # Safety
    ///
    /// `stack_top` must be the end of a writable stack region large enough
    /// for the thread, and must stay valid for as long as the context can run.
    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        start: StartFn,
        arg: usize,
    );

    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Halt the core until the next interrupt arrives.
    fn wait_for_interrupt();
}

/// RAII critical section: interrupts are masked for the guard's lifetime
/// and restored to their previous state on drop.
pub struct InterruptGuard<A: Arch> {
    was_enabled: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch> InterruptGuard<A> {
    pub fn new() -> Self {
        let was_enabled = A::interrupts_enabled();
        A::disable_interrupts();
        Self {
            was_enabled,
            _arch: PhantomData,
        }
    }
}

impl<A: Arch> Default for InterruptGuard<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> Drop for InterruptGuard<A> {
    fn drop(&mut self) {
        if self.was_enabled {
            A::enable_interrupts();
        }
    }
}

/// A no-op architecture implementation.
///
/// Contexts are empty and switching does nothing. It drives the scheduler
/// state machine in tests, where the test body plays the part of whichever
/// thread is current.
pub struct NoOpArch;

impl Arch for NoOpArch {
    type SavedContext = ();

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {}

    unsafe fn init_context(
        _ctx: &mut Self::SavedContext,
        _stack_top: *mut u8,
        _start: StartFn,
        _arg: usize,
    ) {
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

// ARM946E-S application core
#[cfg(target_arch = "arm")]
pub mod armv5;

// Hosted builds, used to run the runtime under the test harness
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub mod x86_64;

#[cfg(target_arch = "arm")]
pub use armv5::Armv5Arch as DefaultArch;

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub use x86_64::HostArch as DefaultArch;

#[cfg(not(any(target_arch = "arm", all(target_arch = "x86_64", target_os = "linux"))))]
compile_error!("cothread supports ARMv5TE targets and x86_64 Linux hosts only.");

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);
    static DISABLE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct TrackingArch;

    impl Arch for TrackingArch {
        type SavedContext = ();

        unsafe fn context_switch(_: *mut (), _: *const ()) {}

        unsafe fn init_context(_: &mut (), _: *mut u8, _: StartFn, _: usize) {}

        fn enable_interrupts() {
            ENABLED.store(true, Ordering::SeqCst);
        }

        fn disable_interrupts() {
            DISABLE_CALLS.fetch_add(1, Ordering::SeqCst);
            ENABLED.store(false, Ordering::SeqCst);
        }

        fn interrupts_enabled() -> bool {
            ENABLED.load(Ordering::SeqCst)
        }

        fn wait_for_interrupt() {}
    }

    #[test]
    fn test_interrupt_guard_nests() {
        assert!(TrackingArch::interrupts_enabled());
        {
            let _outer = InterruptGuard::<TrackingArch>::new();
            assert!(!TrackingArch::interrupts_enabled());
            {
                let _inner = InterruptGuard::<TrackingArch>::new();
                assert!(!TrackingArch::interrupts_enabled());
            }
            // Inner guard saw interrupts already masked and leaves them so
            assert!(!TrackingArch::interrupts_enabled());
        }
        assert!(TrackingArch::interrupts_enabled());
        assert_eq!(DISABLE_CALLS.load(Ordering::SeqCst), 2);
    }
}
