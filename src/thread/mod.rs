//! Thread identity, state and handles.

use alloc::boxed::Box;
use core::num::NonZeroUsize;

pub mod builder;
pub mod context;
pub mod tcb;

pub use builder::ThreadBuilder;
pub use context::ContextStore;
pub use tcb::Tcb;

/// Boxed thread body. Its return value becomes the exit code.
pub type Entry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Unique identifier for threads.
///
/// Thread IDs are never reused and are guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID, `None` for zero.
    pub fn new(id: usize) -> Option<Self> {
        NonZeroUsize::new(id).map(Self)
    }

    /// Create a new thread ID.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `id` is non-zero.
    pub unsafe fn new_unchecked(id: usize) -> Self {
        Self(unsafe { NonZeroUsize::new_unchecked(id) })
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is on the ready queue
    Ready = 0,
    /// Thread owns the CPU
    Running = 1,
    /// Thread is parked in the interrupt wait table
    BlockedOnInterrupt = 2,
    /// Thread is waiting for another thread to exit
    BlockedOnJoin = 3,
    /// Thread has exited and waits to be joined or reclaimed
    Exited = 4,
}

impl ThreadState {
    /// Check if this thread is runnable (ready or running).
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Running)
    }

    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ThreadState::BlockedOnInterrupt | ThreadState::BlockedOnJoin
        )
    }
}

bitflags::bitflags! {
    /// Per-thread flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// Resources are reclaimed at exit; join is refused.
        const DETACHED = 1 << 0;
        /// The thread is parked in the interrupt wait table.
        const WAITING_FOR_IRQ = 1 << 1;
    }
}

/// Reference to a thread, valid until its control block is reclaimed.
///
/// Handles are plain values: they can be copied freely and outlive the
/// thread. Once the thread's resources have been reclaimed every
/// operation on the handle fails with `InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    pub(crate) slot: usize,
    pub(crate) id: ThreadId,
}

impl ThreadHandle {
    /// Get the thread's unique identifier.
    pub fn id(&self) -> ThreadId {
        self.id
    }
}
