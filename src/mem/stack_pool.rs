//! Stack pool allocator for thread stacks.
//!
//! Stacks come in a handful of size classes. Freed stacks are kept on a
//! per-class free list and handed out again before new memory is requested
//! from the global allocator. An optional byte budget caps the total amount
//! of stack memory the pool may hold.

use crate::errors::ResourceError;
use alloc::alloc::{alloc, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Alignment of every stack allocation.
pub const STACK_ALIGN: usize = 16;

/// Value written at the low end of a stack for overflow detection.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

const CLASS_COUNT: usize = 5;

/// Stack size classes for the pool allocator.
///
/// Different threads may need different stack sizes, so we provide
/// several size classes to minimize memory waste.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSizeClass {
    /// Tiny stack: 1 KiB
    Tiny = 1024,
    /// Small stack: 4 KiB
    Small = 4096,
    /// Medium stack: 16 KiB
    Medium = 16384,
    /// Large stack: 64 KiB
    Large = 65536,
    /// Extra large stack: 256 KiB
    ExtraLarge = 262144,
}

impl StackSizeClass {
    /// Get the size in bytes for this stack class.
    pub fn size(self) -> usize {
        self as usize
    }

    /// Choose the smallest size class that can accommodate `requested_size`.
    ///
    /// Returns `None` if the request is larger than the largest class.
    pub fn for_size(requested_size: usize) -> Option<Self> {
        match requested_size {
            0..=1024 => Some(Self::Tiny),
            1025..=4096 => Some(Self::Small),
            4097..=16384 => Some(Self::Medium),
            16385..=65536 => Some(Self::Large),
            65537..=262144 => Some(Self::ExtraLarge),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            StackSizeClass::Tiny => 0,
            StackSizeClass::Small => 1,
            StackSizeClass::Medium => 2,
            StackSizeClass::Large => 3,
            StackSizeClass::ExtraLarge => 4,
        }
    }
}

/// An owned thread stack.
///
/// The memory is returned to the global allocator when the stack is dropped.
pub struct Stack {
    /// Start of the stack memory (lowest address)
    memory: NonNull<u8>,
    /// Size class this stack belongs to
    size_class: StackSizeClass,
}

impl Stack {
    /// Get the usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.size_class.size()
    }

    /// Get the stack size class.
    pub fn size_class(&self) -> StackSizeClass {
        self.size_class
    }

    /// Get a pointer to the bottom of the stack (highest address).
    ///
    /// This is where the stack pointer starts, the stack grows down from it.
    pub fn stack_bottom(&self) -> *mut u8 {
        unsafe { self.memory.as_ptr().add(self.size()) }
    }

    /// Get a pointer to the top of the stack (lowest address).
    ///
    /// A thread that reaches this address has used up its stack.
    pub fn stack_top(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Install a stack canary value for overflow detection.
    ///
    /// This writes a known pattern at the low end of the stack that can be
    /// checked later to detect stack overflow.
    pub fn install_canary(&self, canary: u64) {
        let canary_location = self.memory.as_ptr() as *mut u64;
        unsafe {
            canary_location.write(canary);
        }
    }

    /// Check if the stack canary is still intact.
    pub fn check_canary(&self, expected_canary: u64) -> bool {
        let canary_location = self.memory.as_ptr() as *const u64;
        unsafe { canary_location.read() == expected_canary }
    }

    fn layout(size_class: StackSizeClass) -> Option<Layout> {
        Layout::from_size_align(size_class.size(), STACK_ALIGN).ok()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Some(layout) = Self::layout(self.size_class) {
            unsafe {
                dealloc(self.memory.as_ptr(), layout);
            }
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("top", &self.stack_top())
            .field("bottom", &self.stack_bottom())
            .field("size_class", &self.size_class)
            .finish()
    }
}

unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

/// Pool-based allocator for thread stacks.
///
/// This allocator maintains separate free lists for each stack size class
/// to minimize fragmentation and allocation overhead.
pub struct StackPool {
    /// Free stacks for each size class
    free_stacks: [Mutex<Vec<Stack>>; CLASS_COUNT],
    /// Upper bound on `reserved` in bytes
    budget: Option<usize>,
    /// Statistics counters
    stats: StackPoolStats,
}

#[derive(Debug, Default)]
struct StackPoolStats {
    /// Number of stacks obtained from the global allocator
    allocated: AtomicUsize,
    /// Number of stacks returned to the pool
    deallocated: AtomicUsize,
    /// Number of stacks currently handed out
    in_use: AtomicUsize,
    /// Bytes currently held, in use or on a free list
    reserved: AtomicUsize,
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StackPool {
    pub const fn new(budget: Option<usize>) -> Self {
        Self {
            free_stacks: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            budget,
            stats: StackPoolStats {
                allocated: AtomicUsize::new(0),
                deallocated: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                reserved: AtomicUsize::new(0),
            },
        }
    }

    /// Allocate a stack of at least `requested` bytes.
    pub fn allocate_bytes(&self, requested: usize) -> Result<Stack, ResourceError> {
        let size_class =
            StackSizeClass::for_size(requested).ok_or(ResourceError::StackTooLarge(requested))?;
        self.allocate(size_class)
            .ok_or(ResourceError::Stack { requested })
    }

    /// Allocate a stack of the given size class.
    ///
    /// This will first try to reuse a stack from the free list, and only
    /// allocate new memory if no suitable stack is available.
    pub fn allocate(&self, size_class: StackSizeClass) -> Option<Stack> {
        if let Some(stack) = self.free_stacks[size_class.index()].lock().pop() {
            self.stats.in_use.fetch_add(1, Ordering::AcqRel);
            return Some(stack);
        }

        if !self.fits_budget(size_class.size()) {
            // Cached stacks of other classes may be what is in the way
            self.trim();
            if !self.fits_budget(size_class.size()) {
                return None;
            }
        }

        self.allocate_new_stack(size_class)
    }

    /// Return a stack to the pool for reuse.
    pub fn deallocate(&self, stack: Stack) {
        self.stats.in_use.fetch_sub(1, Ordering::AcqRel);
        self.stats.deallocated.fetch_add(1, Ordering::AcqRel);

        let mut free_list = self.free_stacks[stack.size_class.index()].lock();
        if free_list.try_reserve(1).is_ok() {
            free_list.push(stack);
        } else {
            // No room to cache it, give the memory back instead
            self.stats
                .reserved
                .fetch_sub(stack.size(), Ordering::AcqRel);
        }
    }

    /// Release every cached stack back to the global allocator.
    pub fn trim(&self) {
        for free_list in &self.free_stacks {
            let mut free_list = free_list.lock();
            for stack in free_list.drain(..) {
                self.stats
                    .reserved
                    .fetch_sub(stack.size(), Ordering::AcqRel);
            }
        }
    }

    /// Get statistics about the stack pool.
    ///
    /// Returns `(allocated, deallocated, in_use)`.
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.allocated.load(Ordering::Acquire),
            self.stats.deallocated.load(Ordering::Acquire),
            self.stats.in_use.load(Ordering::Acquire),
        )
    }

    /// Bytes currently held by the pool, in use or cached.
    pub fn reserved_bytes(&self) -> usize {
        self.stats.reserved.load(Ordering::Acquire)
    }

    fn fits_budget(&self, size: usize) -> bool {
        match self.budget {
            Some(budget) => self.reserved_bytes() + size <= budget,
            None => true,
        }
    }

    fn allocate_new_stack(&self, size_class: StackSizeClass) -> Option<Stack> {
        let layout = Stack::layout(size_class)?;
        let memory = NonNull::new(unsafe { alloc(layout) })?;

        self.stats.allocated.fetch_add(1, Ordering::AcqRel);
        self.stats.in_use.fetch_add(1, Ordering::AcqRel);
        self.stats
            .reserved
            .fetch_add(size_class.size(), Ordering::AcqRel);

        Some(Stack { memory, size_class })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_size_class_for_size() {
        assert_eq!(StackSizeClass::for_size(512), Some(StackSizeClass::Tiny));
        assert_eq!(StackSizeClass::for_size(4096), Some(StackSizeClass::Small));
        assert_eq!(StackSizeClass::for_size(8192), Some(StackSizeClass::Medium));
        assert_eq!(StackSizeClass::for_size(32768), Some(StackSizeClass::Large));
        assert_eq!(StackSizeClass::for_size(131072), Some(StackSizeClass::ExtraLarge));
        assert_eq!(StackSizeClass::for_size(500000), None);
    }

    #[test]
    fn test_stack_pool_reuses_freed_stacks() {
        let pool = StackPool::new(None);
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let first = stack.stack_top();

        assert_eq!(stack.size_class(), StackSizeClass::Small);
        assert_eq!(stack.size(), StackSizeClass::Small.size());
        assert_eq!(stack.stack_bottom() as usize - first as usize, 4096);

        pool.deallocate(stack);
        let (allocated, deallocated, in_use) = pool.stats();
        assert_eq!((allocated, deallocated, in_use), (1, 1, 0));

        let again = pool.allocate(StackSizeClass::Small).unwrap();
        assert_eq!(again.stack_top(), first);
        assert_eq!(pool.stats().0, 1);
        pool.deallocate(again);
    }

    #[test]
    fn test_budget_limits_new_allocations() {
        let pool = StackPool::new(Some(8192));
        let a = pool.allocate(StackSizeClass::Small).unwrap();
        let b = pool.allocate(StackSizeClass::Small).unwrap();
        assert!(pool.allocate(StackSizeClass::Tiny).is_none());
        assert_eq!(
            pool.allocate_bytes(100).unwrap_err(),
            ResourceError::Stack { requested: 100 }
        );

        pool.deallocate(a);
        pool.deallocate(b);
        assert_eq!(pool.reserved_bytes(), 8192);

        // Cached stacks are released to make room for another class
        let tiny = pool.allocate(StackSizeClass::Tiny).unwrap();
        assert_eq!(pool.reserved_bytes(), 1024);
        pool.deallocate(tiny);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let pool = StackPool::new(None);
        assert_eq!(
            pool.allocate_bytes(1 << 20).unwrap_err(),
            ResourceError::StackTooLarge(1 << 20)
        );
    }

    #[test]
    fn test_stack_canary() {
        let pool = StackPool::new(None);
        let stack = pool.allocate(StackSizeClass::Small).unwrap();

        stack.install_canary(STACK_CANARY);
        assert!(stack.check_canary(STACK_CANARY));
        assert!(!stack.check_canary(0x1234567890ABCDEF));

        pool.deallocate(stack);
    }
}
