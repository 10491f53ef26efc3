//! Slab of thread control blocks.

use crate::arch::Arch;
use crate::errors::ResourceError;
use crate::thread::{Tcb, ThreadHandle};
use alloc::vec::Vec;

/// Owns every live control block, addressed by slot index.
///
/// Vacant slots are recycled through a free list. The table never holds
/// more than `max_threads` control blocks.
pub struct ThreadTable<A: Arch> {
    slots: Vec<Option<Tcb<A>>>,
    free: Vec<usize>,
    live: usize,
    max_threads: usize,
}

impl<A: Arch> ThreadTable<A> {
    pub const fn new(max_threads: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_threads,
        }
    }

    /// Make sure the next `insert` cannot fail.
    ///
    /// Memory for the slot and for its later return to the free list is
    /// reserved up front, so reclaiming a thread never allocates.
    pub fn reserve(&mut self) -> Result<(), ResourceError> {
        if self.live >= self.max_threads {
            return Err(ResourceError::TooManyThreads);
        }
        if !self.free.is_empty() {
            return Ok(());
        }

        self.slots
            .try_reserve(1)
            .map_err(|_| ResourceError::ControlBlocks)?;
        let wanted = self.slots.len() + 1 - self.free.len();
        self.free
            .try_reserve(wanted)
            .map_err(|_| ResourceError::ControlBlocks)
    }

    /// Store a control block and return its slot.
    ///
    /// Must follow a successful [`ThreadTable::reserve`].
    pub fn insert(&mut self, tcb: Tcb<A>) -> usize {
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none());
                self.slots[slot] = Some(tcb);
                slot
            }
            None => {
                self.slots.push(Some(tcb));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<Tcb<A>> {
        let tcb = self.slots.get_mut(slot)?.take()?;
        self.live -= 1;
        self.free.push(slot);
        Some(tcb)
    }

    pub fn get(&self, slot: usize) -> Option<&Tcb<A>> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Tcb<A>> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Resolve a handle, rejecting it if its thread was reclaimed.
    pub fn lookup(&self, handle: ThreadHandle) -> Option<&Tcb<A>> {
        self.get(handle.slot).filter(|tcb| tcb.id == handle.id)
    }

    pub fn lookup_mut(&mut self, handle: ThreadHandle) -> Option<&mut Tcb<A>> {
        self.get_mut(handle.slot).filter(|tcb| tcb.id == handle.id)
    }

    pub fn handle(&self, slot: usize) -> Option<ThreadHandle> {
        self.get(slot).map(|tcb| ThreadHandle { slot, id: tcb.id })
    }

    /// Number of live control blocks.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Tcb<A>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, tcb)| tcb.as_ref().map(|tcb| (slot, tcb)))
    }
}
