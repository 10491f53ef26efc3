//! Cooperative scheduling.
//!
//! The scheduler keeps every control block in a [`ThreadTable`] and threads
//! them through intrusive queues: the FIFO [`ReadyQueue`] and one bucket per
//! interrupt line in the [`InterruptWaitTable`].

pub mod core;
pub mod irq_wait;
pub mod list;
pub mod ready;
pub mod table;

pub use self::core::{ArchTransfer, JoinStatus, Launch, Scheduler, SchedulerStats, Transfer};
pub use irq_wait::{InterruptWaitTable, IrqLine, IRQ_LINES};
pub use ready::ReadyQueue;
pub use table::ThreadTable;
