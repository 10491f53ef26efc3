#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Cooperative threads for the ARM9 core of a dual-CPU handheld.
//!
//! Threads run until they give up the CPU on their own: by yielding, by
//! blocking until an interrupt line fires, by joining another thread or by
//! exiting. There is no time slicing and no priority. Interrupts are the only
//! asynchronous event; the interrupt layer reports them through
//! [`on_interrupt`], which moves waiting threads back to the ready queue
//! without switching.
//!
//! # Target Platform
//!
//! - **Core**: ARM946E-S (ARMv5TE), single core, no MMU
//! - **Host**: x86_64 Linux, for running the test suite
//!
//! # Features
//!
//! - `std-shim`: hosted build without the bare-metal panic handler
//!
//! # Quick Start
//!
//! ```ignore
//! use cothread::{DefaultArch, IrqLine, Runtime, RuntimeConfig};
//!
//! static RUNTIME: Runtime<DefaultArch> = Runtime::new(RuntimeConfig::new());
//!
//! fn main() {
//!     RUNTIME.init().unwrap();
//!     RUNTIME.register_global();
//!     RUNTIME.spawn_idle().unwrap();
//!
//!     let worker = RUNTIME.spawn(|| {
//!         for _ in 0..3 {
//!             cothread::yield_now().unwrap();
//!         }
//!         42
//!     }, 0, false).unwrap();
//!
//!     assert_eq!(RUNTIME.join(worker), Ok(42));
//! }
//!
//! // In the IRQ dispatcher
//! fn irq_handler(flags: u32) {
//!     cothread::on_interrupt_mask(flags);
//! }
//! ```
//!
//! # Architecture
//!
//! - `sched::core::Scheduler` is a plain state machine: it updates control
//!   blocks and queues and answers which register save areas to switch.
//! - `kernel::Runtime` wraps it in an interrupt mask and a lock and performs
//!   the switches.
//! - `arch` holds the only code that touches raw registers.

pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
extern crate std;

extern crate alloc;

#[cfg(test)]
mod tests;

// Panic handler for bare-metal
#[cfg(all(target_os = "none", not(test), not(feature = "std-shim")))]
use core::panic::PanicInfo;

#[cfg(all(target_os = "none", not(test), not(feature = "std-shim")))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("cothread: {}", info);
    arch::DefaultArch::disable_interrupts();
    loop {
        arch::DefaultArch::wait_for_interrupt();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, DefaultArch, InterruptGuard};

// Runtime
pub use config::RuntimeConfig;
pub use kernel::{
    current, exit, get_global_runtime, on_interrupt, on_interrupt_mask, wait_for_interrupt,
    yield_now, Runtime,
};

// Scheduler
pub use sched::{IrqLine, Scheduler, SchedulerStats, IRQ_LINES};

// Threads
pub use thread::{ThreadBuilder, ThreadHandle, ThreadId, ThreadState};

// Memory management
pub use mem::{Stack, StackPool, StackSizeClass};

// Synchronization
pub use sync::{CoMutex, CoMutexGuard};

// Errors
pub use errors::{CothreadError, CothreadResult, InvalidOperationError, ResourceError};
