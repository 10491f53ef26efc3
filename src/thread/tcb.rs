//! Thread control block.

use super::{ContextStore, Entry, ThreadFlags, ThreadHandle, ThreadId, ThreadState};
use crate::arch::Arch;
use crate::mem::{Stack, STACK_CANARY};
use crate::sched::IrqLine;
use alloc::string::String;

/// Position of a control block inside one intrusive queue.
///
/// Links hold slot indices into the thread table rather than pointers, so a
/// growing table never leaves a dangling link behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub linked: bool,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }
}

/// Per-thread metadata and queue membership.
pub struct Tcb<A: Arch> {
    pub(crate) id: ThreadId,
    pub(crate) state: ThreadState,
    pub(crate) flags: ThreadFlags,
    pub(crate) context: ContextStore<A::SavedContext>,
    pub(crate) entry: Option<Entry>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) joiner: Option<ThreadHandle>,
    pub(crate) irq_line: Option<IrqLine>,
    pub(crate) ready_link: Link,
    pub(crate) irq_link: Link,
    pub(crate) name: Option<String>,
}

impl<A: Arch> Tcb<A> {
    /// Control block for a freshly spawned thread. It starts out Ready.
    pub fn new(id: ThreadId, stack: Stack, entry: Entry, detached: bool) -> Self {
        let mut flags = ThreadFlags::empty();
        flags.set(ThreadFlags::DETACHED, detached);

        Self {
            id,
            state: ThreadState::Ready,
            flags,
            context: ContextStore::new(Some(stack)),
            entry: Some(entry),
            exit_code: None,
            joiner: None,
            irq_line: None,
            ready_link: Link::new(),
            irq_link: Link::new(),
            name: None,
        }
    }

    /// Control block adopting the context that calls `init`.
    ///
    /// It owns no stack, is already running and can never be joined.
    pub fn bootstrap(id: ThreadId) -> Self {
        Self {
            id,
            state: ThreadState::Running,
            flags: ThreadFlags::DETACHED,
            context: ContextStore::new(None),
            entry: None,
            exit_code: None,
            joiner: None,
            irq_line: None,
            ready_link: Link::new(),
            irq_link: Link::new(),
            name: Some(String::from("main")),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn is_detached(&self) -> bool {
        self.flags.contains(ThreadFlags::DETACHED)
    }

    pub fn is_waiting_for_irq(&self) -> bool {
        self.flags.contains(ThreadFlags::WAITING_FOR_IRQ)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn context(&self) -> &ContextStore<A::SavedContext> {
        &self.context
    }

    /// Whether the stack canary is still intact. Threads without an owned
    /// stack always pass.
    pub fn stack_intact(&self) -> bool {
        self.context
            .stack()
            .map_or(true, |stack| stack.check_canary(STACK_CANARY))
    }
}

impl<A: Arch> core::fmt::Debug for Tcb<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("exit_code", &self.exit_code)
            .field("joiner", &self.joiner)
            .field("irq_line", &self.irq_line)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::NoOpArch;
    use crate::mem::{StackPool, StackSizeClass};
    use alloc::boxed::Box;

    #[test]
    fn test_new_thread_is_ready_and_unlinked() {
        let pool = StackPool::new(None);
        let stack = pool.allocate(StackSizeClass::Tiny).unwrap();
        let id = ThreadId::new(2).unwrap();
        let tcb = Tcb::<NoOpArch>::new(id, stack, Box::new(|| 0), true);

        assert_eq!(tcb.state(), ThreadState::Ready);
        assert!(tcb.is_detached());
        assert!(!tcb.is_waiting_for_irq());
        assert!(!tcb.ready_link.linked && !tcb.irq_link.linked);
        let (low, high) = tcb.context().stack_bounds().unwrap();
        assert_eq!(high as usize - low as usize, 1024);
    }

    #[test]
    fn test_stack_canary_detects_overwrite() {
        let pool = StackPool::new(None);
        let stack = pool.allocate(StackSizeClass::Tiny).unwrap();
        stack.install_canary(STACK_CANARY);
        let low = stack.stack_top() as *mut u64;
        let tcb = Tcb::<NoOpArch>::new(ThreadId::new(3).unwrap(), stack, Box::new(|| 0), false);
        assert!(tcb.stack_intact());

        // SAFETY: the stack is owned by `tcb` and not in use
        unsafe { low.write(0) };
        assert!(!tcb.stack_intact());

        let main = Tcb::<NoOpArch>::bootstrap(ThreadId::new(1).unwrap());
        assert!(main.stack_intact());
        assert!(main.context().stack_bounds().is_none());
        assert_eq!(main.name(), Some("main"));
    }
}
