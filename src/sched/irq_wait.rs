//! Interrupt wait table.
//!
//! Threads that block on an interrupt line are parked in that line's bucket
//! until the interrupt layer reports the line. Draining a bucket only moves
//! threads to the ready queue; it never switches.

use super::list::{IrqLink, TcbQueue};
use super::ready::ReadyQueue;
use super::table::ThreadTable;
use crate::arch::Arch;
use crate::thread::{ThreadFlags, ThreadState};

/// Number of interrupt lines a thread can wait on.
pub const IRQ_LINES: usize = 32;

/// A validated interrupt line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqLine(u8);

impl IrqLine {
    /// Returns `None` for lines outside `0..IRQ_LINES`.
    pub const fn new(line: u8) -> Option<Self> {
        if (line as usize) < IRQ_LINES {
            Some(Self(line))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Bit of this line in an interrupt flags word.
    pub const fn mask(self) -> u32 {
        1 << (self.0 as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for IrqLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ{}", self.0)
    }
}

/// One FIFO bucket of blocked threads per interrupt line.
#[derive(Debug)]
pub struct InterruptWaitTable {
    buckets: [TcbQueue<IrqLink>; IRQ_LINES],
}

impl Default for InterruptWaitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptWaitTable {
    pub const fn new() -> Self {
        const EMPTY: TcbQueue<IrqLink> = TcbQueue::new();
        Self {
            buckets: [EMPTY; IRQ_LINES],
        }
    }

    /// Park `slot` on `line`.
    pub fn park<A: Arch>(&mut self, table: &mut ThreadTable<A>, slot: usize, line: IrqLine) {
        if let Some(tcb) = table.get_mut(slot) {
            tcb.state = ThreadState::BlockedOnInterrupt;
            tcb.flags.insert(ThreadFlags::WAITING_FOR_IRQ);
            tcb.irq_line = Some(line);
        }
        self.buckets[line.index()].push_back(table, slot);
    }

    /// Move every thread waiting on `line` to the ready queue in wait order.
    ///
    /// Returns the number of threads woken.
    pub fn wake<A: Arch>(
        &mut self,
        table: &mut ThreadTable<A>,
        ready: &mut ReadyQueue,
        line: IrqLine,
    ) -> usize {
        let bucket = &mut self.buckets[line.index()];
        let mut woken = 0;
        while let Some(slot) = bucket.pop_front(table) {
            if let Some(tcb) = table.get_mut(slot) {
                tcb.flags.remove(ThreadFlags::WAITING_FOR_IRQ);
                tcb.irq_line = None;
            }
            ready.push(table, slot);
            woken += 1;
        }
        woken
    }

    /// Number of threads waiting on `line`.
    pub fn waiting(&self, line: IrqLine) -> usize {
        self.buckets[line.index()].len()
    }

    pub fn total_waiting(&self) -> usize {
        self.buckets.iter().map(TcbQueue::len).sum()
    }

    pub fn iter<'a, A: Arch>(
        &'a self,
        table: &'a ThreadTable<A>,
        line: IrqLine,
    ) -> impl Iterator<Item = usize> + 'a {
        self.buckets[line.index()].iter(table)
    }

    /// Lines selected by `mask`, lowest first.
    pub fn lines_in(mask: u32) -> impl Iterator<Item = IrqLine> {
        (0..IRQ_LINES as u8)
            .filter(move |&line| mask & (1u32 << line) != 0)
            .map(IrqLine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::NoOpArch;
    use crate::thread::{Tcb, ThreadId};
    use alloc::vec::Vec;

    fn table_with(n: usize) -> ThreadTable<NoOpArch> {
        let mut table = ThreadTable::new(n);
        for id in 1..=n {
            table.reserve().unwrap();
            table.insert(Tcb::bootstrap(ThreadId::new(id).unwrap()));
        }
        table
    }

    #[test]
    fn test_irq_line_bounds() {
        assert_eq!(IrqLine::new(31).map(IrqLine::mask), Some(1 << 31));
        assert!(IrqLine::new(32).is_none());
    }

    #[test]
    fn test_wake_moves_only_that_line() {
        let mut table = table_with(3);
        let mut ready = ReadyQueue::new();
        let mut waits = InterruptWaitTable::new();
        let three = IrqLine::new(3).unwrap();
        let five = IrqLine::new(5).unwrap();

        waits.park(&mut table, 0, three);
        waits.park(&mut table, 1, five);
        waits.park(&mut table, 2, three);
        assert_eq!(waits.waiting(three), 2);
        assert_eq!(table.get(1).unwrap().irq_line, Some(five));

        assert_eq!(waits.wake(&mut table, &mut ready, three), 2);
        assert_eq!(ready.iter(&table).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(waits.waiting(five), 1);
        assert_eq!(table.get(1).unwrap().state(), ThreadState::BlockedOnInterrupt);

        let woken = table.get(2).unwrap();
        assert_eq!(woken.state(), ThreadState::Ready);
        assert!(!woken.is_waiting_for_irq());
        assert_eq!(woken.irq_line, None);

        // Empty bucket
        assert_eq!(waits.wake(&mut table, &mut ready, three), 0);
        assert_eq!(waits.total_waiting(), 1);
    }

    #[test]
    fn test_lines_in_mask() {
        let lines: Vec<u8> = InterruptWaitTable::lines_in(0b1010_0001)
            .map(IrqLine::get)
            .collect();
        assert_eq!(lines, [0, 5, 7]);
    }
}
