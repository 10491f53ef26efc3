//! Scheduler core.
//!
//! The scheduler is a pure state machine. Operations that suspend the
//! calling thread update control blocks and queues, then hand back a
//! [`Transfer`] naming the two register save areas to switch between. The
//! caller performs the switch itself once it has released whatever lock
//! guards the scheduler.

use super::irq_wait::{InterruptWaitTable, IrqLine};
use super::ready::ReadyQueue;
use super::table::ThreadTable;
use crate::arch::{Arch, StartFn};
use crate::config::RuntimeConfig;
use crate::errors::{CothreadError, CothreadResult, InvalidOperationError};
use crate::mem::{Stack, StackPool, STACK_CANARY};
use crate::thread::{Entry, Tcb, ThreadBuilder, ThreadFlags, ThreadHandle, ThreadId, ThreadState};

/// Where freshly spawned threads begin executing.
#[derive(Debug, Clone, Copy)]
pub struct Launch {
    pub start: StartFn,
    pub arg: usize,
}

/// A switch decided by the scheduler and not yet carried out.
///
/// `prev` receives the suspending thread's registers, `next` holds the
/// registers of the thread taking over. Both point into scheduler-owned
/// memory and stay valid until the scheduler is next mutated.
#[derive(Debug)]
pub struct Transfer<C> {
    pub from: ThreadHandle,
    pub to: ThreadHandle,
    pub prev: *mut C,
    pub next: *const C,
}

/// Transfer between two contexts of architecture `A`.
pub type ArchTransfer<A> = Transfer<<A as Arch>::SavedContext>;

/// Outcome of a join request.
#[derive(Debug)]
pub enum JoinStatus<C> {
    /// The target had already exited and has been reclaimed.
    Exited(i32),
    /// The caller must switch away and call `collect_joined` once resumed.
    Blocked(Transfer<C>),
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub spawned: usize,
    pub exited: usize,
    pub reclaimed: usize,
    pub context_switches: usize,
    /// Threads moved out of the wait table by interrupts
    pub interrupt_wakeups: usize,
    pub live_threads: usize,
    pub ready_threads: usize,
    pub waiting_threads: usize,
}

/// Cooperative scheduler state for one core.
pub struct Scheduler<A: Arch> {
    config: RuntimeConfig,
    table: ThreadTable<A>,
    ready: ReadyQueue,
    waits: InterruptWaitTable,
    stacks: StackPool,
    current: Option<usize>,
    launch: Option<Launch>,
    next_id: usize,
    /// Save area for threads whose control block is gone by the time they
    /// switch away. Never resumed.
    scratch: Option<A::SavedContext>,
    /// Stack of a detached thread that exited and may still be executing on it.
    graveyard: Option<Stack>,
    counters: SchedulerStats,
}

impl<A: Arch> Scheduler<A> {
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            table: ThreadTable::new(config.max_threads),
            ready: ReadyQueue::new(),
            waits: InterruptWaitTable::new(),
            stacks: StackPool::new(config.stack_budget),
            current: None,
            launch: None,
            next_id: 1,
            scratch: None,
            graveyard: None,
            counters: SchedulerStats {
                spawned: 0,
                exited: 0,
                reclaimed: 0,
                context_switches: 0,
                interrupt_wakeups: 0,
                live_threads: 0,
                ready_threads: 0,
                waiting_threads: 0,
            },
        }
    }

    /// Adopt the calling context as the first running thread.
    ///
    /// Threads spawned afterwards begin at `launch`.
    pub fn bootstrap(&mut self, launch: Launch) -> CothreadResult<ThreadHandle> {
        if self.current.is_some() {
            return Err(InvalidOperationError::AlreadyInitialized.into());
        }

        self.table.reserve()?;
        let id = self.allocate_id();
        let slot = self.table.insert(Tcb::bootstrap(id));
        self.current = Some(slot);
        self.launch = Some(launch);
        self.scratch = Some(A::SavedContext::default());

        log::debug!("cothread: thread {} adopted as main", id);
        Ok(ThreadHandle { slot, id })
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Handle of the running thread.
    pub fn current(&self) -> CothreadResult<ThreadHandle> {
        let slot = self.current_slot()?;
        self.table
            .handle(slot)
            .ok_or(InvalidOperationError::InvalidHandle.into())
    }

    /// Create a thread and append it to the ready queue.
    ///
    /// On failure nothing is left behind: no control block, no stack.
    pub fn spawn(&mut self, builder: ThreadBuilder, entry: Entry) -> CothreadResult<ThreadHandle> {
        self.current_slot()?;
        let launch = self
            .launch
            .ok_or(InvalidOperationError::NotInitialized)?;

        self.table.reserve()?;
        let requested = match builder.stack_size {
            0 => self.config.default_stack_size,
            size => size,
        };
        let stack = self.stacks.allocate_bytes(requested).map_err(|e| {
            log::warn!("cothread: spawn failed: {}", e);
            CothreadError::from(e)
        })?;
        if self.config.stack_canary {
            stack.install_canary(STACK_CANARY);
        }

        let stack_top = stack.stack_bottom();
        let id = self.allocate_id();
        let mut tcb = Tcb::new(id, stack, entry, builder.detached);
        tcb.name = builder.name;
        // SAFETY: the stack is owned by the control block and lives until the
        // thread is reclaimed.
        unsafe {
            A::init_context(&mut tcb.context.regs, stack_top, launch.start, launch.arg);
        }

        let slot = self.table.insert(tcb);
        self.ready.push(&mut self.table, slot);
        self.counters.spawned += 1;

        log::debug!(
            "cothread: spawned thread {} ({} byte stack{})",
            id,
            requested,
            if builder.detached { ", detached" } else { "" }
        );
        Ok(ThreadHandle { slot, id })
    }

    /// Give up the CPU to the head of the ready queue.
    ///
    /// `None` when no other thread is ready: the caller keeps running.
    pub fn yield_now(&mut self) -> CothreadResult<Option<ArchTransfer<A>>> {
        let cur = self.current_slot()?;
        if self.ready.is_empty() {
            return Ok(None);
        }

        self.check_stack(cur);
        let (from, prev) = self.suspend_point(cur)?;
        self.ready.push(&mut self.table, cur);
        self.dispatch(from, prev).map(Some)
    }

    /// Block the caller until `line` fires.
    pub fn wait_for_interrupt(&mut self, line: IrqLine) -> CothreadResult<ArchTransfer<A>> {
        let cur = self.current_slot()?;
        if self.ready.is_empty() {
            log::error!("cothread: wait on {} with no runnable thread", line);
            return Err(CothreadError::NoRunnableThread);
        }

        self.check_stack(cur);
        let (from, prev) = self.suspend_point(cur)?;
        self.waits.park(&mut self.table, cur, line);
        log::trace!("cothread: thread {} waits on {}", from.id, line);
        self.dispatch(from, prev)
    }

    /// Terminate the caller with `code`.
    ///
    /// A registered joiner becomes ready. A detached caller is reclaimed at
    /// once, except for the stack it is still running on, which is parked
    /// until [`Scheduler::complete_switch`].
    pub fn exit(&mut self, code: i32) -> CothreadResult<ArchTransfer<A>> {
        let cur = self.current_slot()?;
        let (joiner, detached) = {
            let tcb = self.tcb(cur)?;
            (tcb.joiner, tcb.is_detached())
        };
        if self.ready.is_empty() && joiner.is_none() {
            log::error!("cothread: exit with no runnable thread");
            return Err(CothreadError::NoRunnableThread);
        }

        self.check_stack(cur);
        let (from, mut prev) = self.suspend_point(cur)?;
        self.ready.remove(&mut self.table, cur);
        if let Some(tcb) = self.table.get_mut(cur) {
            tcb.state = ThreadState::Exited;
            tcb.exit_code = Some(code);
            tcb.entry = None;
        }
        self.counters.exited += 1;
        log::debug!("cothread: thread {} exited with {}", from.id, code);

        if let Some(joiner) = joiner {
            if self.table.lookup(joiner).is_some() {
                self.ready.push(&mut self.table, joiner.slot);
                log::trace!("cothread: thread {} wakes joiner {}", from.id, joiner.id);
            }
        }

        if detached {
            if let Some(mut tcb) = self.table.remove(cur) {
                if let Some(stack) = tcb.context.take_stack() {
                    self.retire(stack);
                }
                self.counters.reclaimed += 1;
            }
            prev = self
                .scratch
                .as_mut()
                .map(|scratch| scratch as *mut A::SavedContext)
                .ok_or(InvalidOperationError::NotInitialized)?;
        }

        self.dispatch(from, prev)
    }

    /// Wait for `handle` to exit.
    pub fn join(&mut self, handle: ThreadHandle) -> CothreadResult<JoinStatus<A::SavedContext>> {
        let cur = self.current_slot()?;
        let state = self.check_joinable(cur, handle)?;
        if let Some(code) = self.take_if_exited(handle, state) {
            return Ok(JoinStatus::Exited(code));
        }
        if self.ready.is_empty() {
            log::error!("cothread: join with no runnable thread");
            return Err(CothreadError::NoRunnableThread);
        }

        self.check_stack(cur);
        let (from, prev) = self.suspend_point(cur)?;
        if let Some(target) = self.table.lookup_mut(handle) {
            target.joiner = Some(from);
        }
        if let Some(tcb) = self.table.get_mut(cur) {
            tcb.state = ThreadState::BlockedOnJoin;
        }
        log::trace!("cothread: thread {} joins {}", from.id, handle.id);
        self.dispatch(from, prev).map(JoinStatus::Blocked)
    }

    /// Finish a join that blocked: fetch the exit code and reclaim the target.
    pub fn collect_joined(&mut self, handle: ThreadHandle) -> CothreadResult<i32> {
        let cur = self.current()?;
        let target = self
            .table
            .lookup(handle)
            .ok_or(InvalidOperationError::InvalidHandle)?;
        if target.joiner != Some(cur) {
            return Err(InvalidOperationError::WrongState.into());
        }
        let code = target
            .exit_code
            .ok_or(InvalidOperationError::StillRunning)?;

        self.reclaim(handle.slot);
        Ok(code)
    }

    /// Join without blocking: `None` while the target is still alive.
    pub fn try_join(&mut self, handle: ThreadHandle) -> CothreadResult<Option<i32>> {
        let cur = self.current_slot()?;
        let state = self.check_joinable(cur, handle)?;
        Ok(self.take_if_exited(handle, state))
    }

    /// Let `handle` reclaim itself on exit. Reclaims it now if it already exited.
    pub fn detach(&mut self, handle: ThreadHandle) -> CothreadResult<()> {
        self.current_slot()?;
        let target = self
            .table
            .lookup_mut(handle)
            .ok_or(InvalidOperationError::InvalidHandle)?;
        if target.joiner.is_some() {
            return Err(InvalidOperationError::AlreadyJoined.into());
        }

        target.flags.insert(ThreadFlags::DETACHED);
        if target.state == ThreadState::Exited {
            self.reclaim(handle.slot);
        }
        Ok(())
    }

    /// Wake every thread waiting on `line`. Never switches.
    pub fn on_interrupt(&mut self, line: IrqLine) -> usize {
        let woken = self.waits.wake(&mut self.table, &mut self.ready, line);
        self.counters.interrupt_wakeups += woken;
        if woken > 0 {
            log::trace!("cothread: {} woke {} thread(s)", line, woken);
        }
        woken
    }

    /// [`Scheduler::on_interrupt`] for every line set in `mask`, lowest first.
    pub fn on_interrupt_mask(&mut self, mask: u32) -> usize {
        InterruptWaitTable::lines_in(mask)
            .map(|line| self.on_interrupt(line))
            .sum()
    }

    /// Called by every thread right after it resumes.
    pub fn complete_switch(&mut self) {
        if let Some(stack) = self.graveyard.take() {
            log::trace!("cothread: releasing retired stack {:?}", stack.stack_top());
            self.stacks.deallocate(stack);
        }
    }

    /// Take the body of the running thread. Used once, on its first run.
    pub fn take_entry(&mut self) -> Option<Entry> {
        let cur = self.current?;
        self.table.get_mut(cur)?.entry.take()
    }

    pub fn state(&self, handle: ThreadHandle) -> CothreadResult<ThreadState> {
        Ok(self.lookup(handle)?.state)
    }

    pub fn is_detached(&self, handle: ThreadHandle) -> CothreadResult<bool> {
        Ok(self.lookup(handle)?.is_detached())
    }

    /// Exit code of a thread that exited but has not been reclaimed.
    pub fn exit_code(&self, handle: ThreadHandle) -> CothreadResult<i32> {
        self.lookup(handle)?
            .exit_code
            .ok_or(InvalidOperationError::StillRunning.into())
    }

    pub fn name(&self, handle: ThreadHandle) -> CothreadResult<Option<&str>> {
        Ok(self.lookup(handle)?.name())
    }

    /// Threads waiting on `line`.
    pub fn waiting_on(&self, line: IrqLine) -> usize {
        self.waits.waiting(line)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            live_threads: self.table.live(),
            ready_threads: self.ready.len(),
            waiting_threads: self.waits.total_waiting(),
            ..self.counters
        }
    }

    pub fn stack_pool(&self) -> &StackPool {
        &self.stacks
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn allocate_id(&mut self) -> ThreadId {
        let id = self.next_id;
        self.next_id += 1;
        // SAFETY: ids start at 1 and only grow.
        unsafe { ThreadId::new_unchecked(id) }
    }

    fn current_slot(&self) -> CothreadResult<usize> {
        self.current
            .ok_or(InvalidOperationError::NotInitialized.into())
    }

    fn tcb(&self, slot: usize) -> CothreadResult<&Tcb<A>> {
        self.table
            .get(slot)
            .ok_or(InvalidOperationError::InvalidHandle.into())
    }

    fn lookup(&self, handle: ThreadHandle) -> CothreadResult<&Tcb<A>> {
        self.table
            .lookup(handle)
            .ok_or(InvalidOperationError::InvalidHandle.into())
    }

    /// Handle and register save area of the thread about to suspend.
    fn suspend_point(&mut self, slot: usize) -> CothreadResult<(ThreadHandle, *mut A::SavedContext)> {
        let tcb = self
            .table
            .get_mut(slot)
            .ok_or(InvalidOperationError::InvalidHandle)?;
        let handle = ThreadHandle { slot, id: tcb.id };
        Ok((handle, tcb.context.regs_ptr()))
    }

    /// Pop the ready queue head and make it the running thread.
    fn dispatch(
        &mut self,
        from: ThreadHandle,
        prev: *mut A::SavedContext,
    ) -> CothreadResult<ArchTransfer<A>> {
        let slot = self
            .ready
            .pop(&mut self.table)
            .ok_or(CothreadError::NoRunnableThread)?;
        let tcb = self
            .table
            .get_mut(slot)
            .ok_or(InvalidOperationError::InvalidHandle)?;
        tcb.state = ThreadState::Running;
        let to = ThreadHandle { slot, id: tcb.id };
        let next = &tcb.context.regs as *const A::SavedContext;

        self.current = Some(slot);
        self.counters.context_switches += 1;
        log::trace!("cothread: switch {} -> {}", from.id, to.id);

        Ok(Transfer {
            from,
            to,
            prev,
            next,
        })
    }

    fn check_joinable(&self, cur: usize, handle: ThreadHandle) -> CothreadResult<ThreadState> {
        let target = self.lookup(handle)?;
        if handle.slot == cur {
            return Err(InvalidOperationError::JoinSelf.into());
        }
        if target.is_detached() {
            return Err(InvalidOperationError::Detached.into());
        }
        if target.joiner.is_some() {
            return Err(InvalidOperationError::AlreadyJoined.into());
        }
        Ok(target.state)
    }

    fn take_if_exited(&mut self, handle: ThreadHandle, state: ThreadState) -> Option<i32> {
        if state != ThreadState::Exited {
            return None;
        }
        let code = self.table.lookup(handle)?.exit_code?;
        self.reclaim(handle.slot);
        Some(code)
    }

    /// Free a control block whose thread is not running and its stack.
    fn reclaim(&mut self, slot: usize) {
        if let Some(mut tcb) = self.table.remove(slot) {
            if let Some(stack) = tcb.context.take_stack() {
                self.stacks.deallocate(stack);
            }
            self.counters.reclaimed += 1;
            log::debug!("cothread: thread {} reclaimed", tcb.id);
        }
    }

    fn retire(&mut self, stack: Stack) {
        if let Some(older) = self.graveyard.replace(stack) {
            self.stacks.deallocate(older);
        }
    }

    fn check_stack(&self, slot: usize) {
        if !self.config.stack_canary {
            return;
        }
        if let Some(tcb) = self.table.get(slot) {
            if !tcb.stack_intact() {
                log::error!("cothread: stack overflow detected in thread {}", tcb.id);
            }
        }
    }

    /// Check every structural invariant, panicking on the first violation.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let Some(cur) = self.current else {
            assert_eq!(self.table.live(), 0);
            return;
        };

        let mut running = 0;
        let mut ready = 0;
        let mut waiting = 0;
        for (slot, tcb) in self.table.iter() {
            match tcb.state {
                ThreadState::Running => {
                    running += 1;
                    assert_eq!(slot, cur, "running thread is not current");
                }
                ThreadState::Ready => ready += 1,
                ThreadState::BlockedOnInterrupt => {
                    waiting += 1;
                    assert!(tcb.is_waiting_for_irq());
                    assert!(tcb.irq_line.is_some());
                }
                ThreadState::BlockedOnJoin => {}
                ThreadState::Exited => {
                    assert!(tcb.exit_code.is_some());
                    assert!(!tcb.is_detached(), "detached thread outlived its exit");
                }
            }

            assert_eq!(tcb.ready_link.linked, tcb.state == ThreadState::Ready);
            assert_eq!(
                tcb.irq_link.linked,
                tcb.state == ThreadState::BlockedOnInterrupt
            );
            if tcb.state != ThreadState::BlockedOnInterrupt {
                assert!(!tcb.is_waiting_for_irq());
                assert!(tcb.irq_line.is_none());
            }
            if tcb.is_detached() {
                assert!(tcb.joiner.is_none(), "detached thread has a joiner");
            }
            if let Some(joiner) = tcb.joiner {
                if tcb.state != ThreadState::Exited {
                    let joiner = self.table.lookup(joiner).map(|j| j.state);
                    assert_eq!(joiner, Some(ThreadState::BlockedOnJoin));
                }
            }
        }

        assert_eq!(running, 1, "exactly one thread runs");
        assert_eq!(ready, self.ready.len());
        assert_eq!(waiting, self.waits.total_waiting());
        for slot in self.ready.iter(&self.table) {
            assert_eq!(self.table.get(slot).map(|t| t.state), Some(ThreadState::Ready));
        }
        for line in InterruptWaitTable::lines_in(u32::MAX) {
            for slot in self.waits.iter(&self.table, line) {
                assert_eq!(self.table.get(slot).and_then(|t| t.irq_line), Some(line));
            }
        }
    }
}
