//! Synchronization between cooperative threads.

pub mod comutex;

pub use comutex::{CoMutex, CoMutexGuard};
