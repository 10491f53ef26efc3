//! Error handling for the cooperative threading runtime.
//!
//! Every fallible operation returns [`CothreadResult`]. Errors are reported
//! synchronously to the caller and never leave the scheduler in a partially
//! updated state.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for threading operations.
pub type CothreadResult<T> = Result<T, CothreadError>;

/// Top-level error type for all threading operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CothreadError {
    /// Stack or control-block memory could not be allocated.
    ResourceExhausted(ResourceError),
    /// The caller violated the join/detach protocol or used a stale handle.
    InvalidOperation(InvalidOperationError),
    /// No other thread is ready to take over the CPU.
    ///
    /// This is a design violation by the embedding application: an idle
    /// thread that always stays ready must exist before any thread blocks.
    NoRunnableThread,
}

/// Allocation failures during spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The configured maximum number of live threads is reached
    TooManyThreads,
    /// Growing the control-block table failed
    ControlBlocks,
    /// The allocator or the stack budget refused a stack
    Stack {
        /// Requested stack size in bytes
        requested: usize,
    },
    /// No stack size class is large enough
    StackTooLarge(usize),
}

/// Protocol violations by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperationError {
    /// The runtime has not been initialized
    NotInitialized,
    /// The runtime was already initialized
    AlreadyInitialized,
    /// The handle refers to a thread whose resources were already reclaimed
    InvalidHandle,
    /// A thread tried to join itself
    JoinSelf,
    /// Join attempted on a detached thread
    Detached,
    /// Another thread is already joining the target
    AlreadyJoined,
    /// The thread has not exited yet
    StillRunning,
    /// The thread is not in a state that allows the operation
    WrongState,
}

impl CothreadError {
    /// Whether this error signals a broken scheduling contract rather than
    /// a recoverable condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CothreadError::NoRunnableThread)
    }
}

impl fmt::Display for CothreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CothreadError::ResourceExhausted(e) => write!(f, "Resource exhausted: {}", e),
            CothreadError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            CothreadError::NoRunnableThread => write!(f, "No runnable thread available"),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            ResourceError::ControlBlocks => write!(f, "Out of memory for thread control blocks"),
            ResourceError::Stack { requested } => {
                write!(f, "Out of memory for a {} byte stack", requested)
            }
            ResourceError::StackTooLarge(size) => write!(f, "Stack size too large: {}", size),
        }
    }
}

impl fmt::Display for InvalidOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOperationError::NotInitialized => write!(f, "Runtime not initialized"),
            InvalidOperationError::AlreadyInitialized => write!(f, "Runtime already initialized"),
            InvalidOperationError::InvalidHandle => write!(f, "Invalid thread handle"),
            InvalidOperationError::JoinSelf => write!(f, "A thread cannot join itself"),
            InvalidOperationError::Detached => write!(f, "Thread is detached"),
            InvalidOperationError::AlreadyJoined => write!(f, "Thread already has a joiner"),
            InvalidOperationError::StillRunning => write!(f, "Thread has not exited"),
            InvalidOperationError::WrongState => write!(f, "Operation called in wrong state"),
        }
    }
}

impl From<ResourceError> for CothreadError {
    fn from(error: ResourceError) -> Self {
        CothreadError::ResourceExhausted(error)
    }
}

impl From<InvalidOperationError> for CothreadError {
    fn from(error: InvalidOperationError) -> Self {
        CothreadError::InvalidOperation(error)
    }
}
