//! Ready queue.

use super::list::{ReadyLink, TcbQueue};
use super::table::ThreadTable;
use crate::arch::Arch;
use crate::thread::ThreadState;

/// FIFO of threads eligible to run next.
///
/// Pushing marks the thread Ready. Among threads made ready at the same
/// time, the one pushed first runs first.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    queue: TcbQueue<ReadyLink>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            queue: TcbQueue::new(),
        }
    }

    pub fn push<A: Arch>(&mut self, table: &mut ThreadTable<A>, slot: usize) {
        if let Some(tcb) = table.get_mut(slot) {
            tcb.state = ThreadState::Ready;
        }
        self.queue.push_back(table, slot);
    }

    pub fn pop<A: Arch>(&mut self, table: &mut ThreadTable<A>) -> Option<usize> {
        self.queue.pop_front(table)
    }

    pub fn remove<A: Arch>(&mut self, table: &mut ThreadTable<A>, slot: usize) -> bool {
        self.queue.remove(table, slot)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn iter<'a, A: Arch>(&self, table: &'a ThreadTable<A>) -> impl Iterator<Item = usize> + 'a {
        self.queue.iter(table)
    }
}
