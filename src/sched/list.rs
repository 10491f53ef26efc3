//! Intrusive FIFO queues of control blocks.
//!
//! A control block carries one [`Link`] per queue kind. Queues store only
//! head and tail slot indices; the links live in the control blocks.

use super::table::ThreadTable;
use crate::arch::Arch;
use crate::thread::tcb::{Link, Tcb};
use core::marker::PhantomData;

/// Selects which link of a control block a queue threads through.
pub trait LinkKind {
    fn link<A: Arch>(tcb: &Tcb<A>) -> &Link;
    fn link_mut<A: Arch>(tcb: &mut Tcb<A>) -> &mut Link;
}

macro_rules! tcb_link_kind {
    ($struct:ident, $field:ident) => {
        #[derive(Debug, Default)]
        pub struct $struct;

        impl LinkKind for $struct {
            fn link<A: Arch>(tcb: &Tcb<A>) -> &Link {
                &tcb.$field
            }

            fn link_mut<A: Arch>(tcb: &mut Tcb<A>) -> &mut Link {
                &mut tcb.$field
            }
        }
    };
}

tcb_link_kind!(ReadyLink, ready_link);
tcb_link_kind!(IrqLink, irq_link);

/// Doubly linked queue over thread table slots.
///
/// Elements are pushed to the back and popped from the front.
#[derive(Debug)]
pub struct TcbQueue<L> {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    _link: PhantomData<L>,
}

impl<L: LinkKind> TcbQueue<L> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _link: PhantomData,
        }
    }

    pub fn push_back<A: Arch>(&mut self, table: &mut ThreadTable<A>, slot: usize) {
        let old_tail = self.tail;
        let Some(tcb) = table.get_mut(slot) else {
            return;
        };
        let link = L::link_mut(tcb);
        debug_assert!(!link.linked, "control block queued twice");
        *link = Link {
            prev: old_tail,
            next: None,
            linked: true,
        };

        match old_tail.and_then(|tail| table.get_mut(tail)) {
            Some(tail) => L::link_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    pub fn pop_front<A: Arch>(&mut self, table: &mut ThreadTable<A>) -> Option<usize> {
        let slot = self.head?;
        self.remove(table, slot);
        Some(slot)
    }

    /// Unlink `slot` from anywhere in the queue. Returns whether it was queued.
    pub fn remove<A: Arch>(&mut self, table: &mut ThreadTable<A>, slot: usize) -> bool {
        let Some(tcb) = table.get_mut(slot) else {
            return false;
        };
        let link = core::mem::take(L::link_mut(tcb));
        if !link.linked {
            return false;
        }

        match link.prev.and_then(|prev| table.get_mut(prev)) {
            Some(prev) => L::link_mut(prev).next = link.next,
            None => self.head = link.next,
        }
        match link.next.and_then(|next| table.get_mut(next)) {
            Some(next) => L::link_mut(next).prev = link.prev,
            None => self.tail = link.prev,
        }
        self.len -= 1;
        true
    }

    pub fn front(&self) -> Option<usize> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Slots in queue order.
    pub fn iter<'a, A: Arch>(&self, table: &'a ThreadTable<A>) -> impl Iterator<Item = usize> + 'a
    where
        L: 'a,
    {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let slot = cursor?;
            cursor = table.get(slot).and_then(|tcb| L::link(tcb).next);
            Some(slot)
        })
    }
}

impl<L: LinkKind> Default for TcbQueue<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::NoOpArch;
    use crate::thread::ThreadId;
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
    fn test_fifo_order() {
        let mut table = table_with(3);
        let mut queue = TcbQueue::<ReadyLink>::new();
        for slot in [2, 0, 1] {
            queue.push_back(&mut table, slot);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.iter(&table).collect::<Vec<_>>(), [2, 0, 1]);

        assert_eq!(queue.pop_front(&mut table), Some(2));
        assert_eq!(queue.pop_front(&mut table), Some(0));
        assert_eq!(queue.pop_front(&mut table), Some(1));
        assert_eq!(queue.pop_front(&mut table), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_from_middle_and_ends() {
        let mut table = table_with(4);
        let mut queue = TcbQueue::<IrqLink>::new();
        for slot in 0..4 {
            queue.push_back(&mut table, slot);
        }

        assert!(queue.remove(&mut table, 1));
        assert!(!queue.remove(&mut table, 1));
        assert!(queue.remove(&mut table, 3));
        assert!(queue.remove(&mut table, 0));
        assert_eq!(queue.iter(&table).collect::<Vec<_>>(), [2]);
        assert_eq!(queue.front(), Some(2));

        queue.push_back(&mut table, 0);
        assert_eq!(queue.iter(&table).collect::<Vec<_>>(), [2, 0]);
    }

    #[test]
    fn test_links_are_independent() {
        let mut table = table_with(2);
        let mut ready = TcbQueue::<ReadyLink>::new();
        let mut waiting = TcbQueue::<IrqLink>::new();
        ready.push_back(&mut table, 0);
        waiting.push_back(&mut table, 0);
        waiting.push_back(&mut table, 1);

        assert_eq!(ready.pop_front(&mut table), Some(0));
        assert_eq!(waiting.iter(&table).collect::<Vec<_>>(), [0, 1]);
    }
}
