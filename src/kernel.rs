//! Runtime: the scheduler plus the machinery that carries out its decisions.
//!
//! Every operation masks interrupts and locks the scheduler. Operations that
//! suspend the caller release the lock before switching, so the thread that
//! takes over can lock the scheduler again right away.

use crate::arch::{Arch, DefaultArch, InterruptGuard};
use crate::config::RuntimeConfig;
use crate::errors::{CothreadResult, InvalidOperationError};
use crate::sched::{ArchTransfer, IrqLine, JoinStatus, Launch, Scheduler, SchedulerStats};
use crate::thread::{Entry, ThreadBuilder, ThreadHandle, ThreadState};
use alloc::string::String;
use portable_atomic::{AtomicBool, AtomicPtr, Ordering};

/// Global runtime reference for interrupt handlers and the free functions.
static GLOBAL_RUNTIME: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Cooperative thread runtime for one core.
///
/// Lives in a `static` (or is leaked): [`Runtime::init`] hands its address
/// to every thread it will ever start.
///
/// ```ignore
/// use cothread::{Runtime, RuntimeConfig, DefaultArch, IrqLine};
///
/// static RUNTIME: Runtime<DefaultArch> = Runtime::new(RuntimeConfig::new());
///
/// fn main() {
///     RUNTIME.init().unwrap();
///     RUNTIME.register_global();
///     RUNTIME.spawn_idle().unwrap();
///
///     let vblank = IrqLine::new(0).unwrap();
///     let worker = RUNTIME
///         .spawn(move || {
///             cothread::wait_for_interrupt(vblank).unwrap();
///             42
///         }, 0, false)
///         .unwrap();
///     assert_eq!(RUNTIME.join(worker), Ok(42));
/// }
/// ```
pub struct Runtime<A: Arch> {
    scheduler: spin::Mutex<Scheduler<A>>,
    initialized: AtomicBool,
}

impl<A: Arch> Runtime<A> {
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            scheduler: spin::Mutex::new(Scheduler::new(config)),
            initialized: AtomicBool::new(false),
        }
    }

    /// Adopt the calling context as the main thread.
    ///
    /// The main thread runs on the boot stack, is detached and cannot be
    /// joined.
    pub fn init(&'static self) -> CothreadResult<ThreadHandle> {
        let _guard = InterruptGuard::<A>::new();
        let launch = Launch {
            start: thread_start::<A>,
            arg: self as *const Self as usize,
        };
        let main = self.scheduler.lock().bootstrap(launch)?;
        self.initialized.store(true, Ordering::Release);

        log::debug!("cothread: runtime initialized");
        Ok(main)
    }

    /// Check if the runtime has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Spawn a thread running `entry`.
    ///
    /// `stack_size == 0` selects the configured default. The closure's
    /// return value becomes the thread's exit code.
    pub fn spawn<F>(&self, entry: F, stack_size: usize, detached: bool) -> CothreadResult<ThreadHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        ThreadBuilder::new()
            .stack_size(stack_size)
            .detached(detached)
            .spawn_on(self, entry)
    }

    pub(crate) fn spawn_with(&self, builder: ThreadBuilder, entry: Entry) -> CothreadResult<ThreadHandle> {
        let _guard = InterruptGuard::<A>::new();
        self.scheduler.lock().spawn(builder, entry)
    }

    /// Spawn the idle thread.
    ///
    /// It stays ready forever, halting the core whenever nothing else can
    /// run, so threads blocked on interrupts always have somewhere to switch to.
    pub fn spawn_idle(&'static self) -> CothreadResult<ThreadHandle> {
        ThreadBuilder::new()
            .detached(true)
            .name("idle")
            .spawn_on(self, move || loop {
                self.idle_step();
            })
    }

    fn idle_step(&self) {
        {
            let _guard = InterruptGuard::<A>::new();
            if self.scheduler.lock().stats().ready_threads == 0 {
                // Wakes on a pending interrupt even while it is masked here
                A::wait_for_interrupt();
            }
        }
        if let Err(e) = self.yield_now() {
            log::error!("cothread: idle thread cannot yield: {}", e);
        }
    }

    /// Let the next ready thread run. Returns at once if there is none.
    pub fn yield_now(&self) -> CothreadResult<()> {
        let _guard = InterruptGuard::<A>::new();
        let transfer = self.scheduler.lock().yield_now()?;
        if let Some(transfer) = transfer {
            // SAFETY: interrupts are masked and the transfer is fresh.
            unsafe { self.switch(transfer) };
        }
        Ok(())
    }

    /// Block until `line` fires.
    ///
    /// Fails with `NoRunnableThread` if no other thread is ready.
    pub fn wait_for_interrupt(&self, line: IrqLine) -> CothreadResult<()> {
        let _guard = InterruptGuard::<A>::new();
        let transfer = self.scheduler.lock().wait_for_interrupt(line)?;
        // SAFETY: as in `yield_now`
        unsafe { self.switch(transfer) };
        Ok(())
    }

    /// Terminate the calling thread.
    ///
    /// # Panics
    ///
    /// If no thread is left to run. That breaks the contract that some thread,
    /// usually the idle thread, always stays ready.
    pub fn exit(&self, code: i32) -> ! {
        let _guard = InterruptGuard::<A>::new();
        let transfer = match self.scheduler.lock().exit(code) {
            Ok(transfer) => transfer,
            Err(e) => panic!("cothread: thread cannot exit: {}", e),
        };
        // SAFETY: `prev` is the scratch area or the exited thread's own save
        // area, neither of which is ever resumed.
        unsafe { A::context_switch(transfer.prev, transfer.next) };
        unreachable!("cothread: exited thread resumed");
    }

    /// Wait for `handle` to exit and return its exit code.
    ///
    /// Returns immediately if it already exited. Either way the thread's
    /// resources are reclaimed and the handle becomes stale.
    pub fn join(&self, handle: ThreadHandle) -> CothreadResult<i32> {
        let _guard = InterruptGuard::<A>::new();
        let status = self.scheduler.lock().join(handle)?;
        match status {
            JoinStatus::Exited(code) => Ok(code),
            JoinStatus::Blocked(transfer) => {
                // SAFETY: as in `yield_now`
                unsafe { self.switch(transfer) };
                self.scheduler.lock().collect_joined(handle)
            }
        }
    }

    /// Collect the exit code of `handle` if it already exited, without blocking.
    pub fn try_join(&self, handle: ThreadHandle) -> CothreadResult<Option<i32>> {
        let _guard = InterruptGuard::<A>::new();
        self.scheduler.lock().try_join(handle)
    }

    pub fn detach(&self, handle: ThreadHandle) -> CothreadResult<()> {
        let _guard = InterruptGuard::<A>::new();
        self.scheduler.lock().detach(handle)
    }

    /// Wake all threads waiting on `line`. Safe to call from interrupt context.
    pub fn on_interrupt(&self, line: IrqLine) -> usize {
        let _guard = InterruptGuard::<A>::new();
        self.scheduler.lock().on_interrupt(line)
    }

    /// Wake the threads waiting on any line set in `mask`.
    pub fn on_interrupt_mask(&self, mask: u32) -> usize {
        let _guard = InterruptGuard::<A>::new();
        self.scheduler.lock().on_interrupt_mask(mask)
    }

    pub fn current(&self) -> CothreadResult<ThreadHandle> {
        self.with_scheduler(|sched| sched.current())
    }

    pub fn state(&self, handle: ThreadHandle) -> CothreadResult<ThreadState> {
        self.with_scheduler(|sched| sched.state(handle))
    }

    pub fn is_detached(&self, handle: ThreadHandle) -> CothreadResult<bool> {
        self.with_scheduler(|sched| sched.is_detached(handle))
    }

    /// Exit code of `handle` once it has exited and until it is reclaimed.
    pub fn exit_code(&self, handle: ThreadHandle) -> CothreadResult<i32> {
        self.with_scheduler(|sched| sched.exit_code(handle))
    }

    pub fn name(&self, handle: ThreadHandle) -> CothreadResult<Option<String>> {
        self.with_scheduler(|sched| Ok(sched.name(handle)?.map(String::from)))
    }

    pub fn waiting_on(&self, line: IrqLine) -> usize {
        self.with_scheduler(|sched| sched.waiting_on(line))
    }

    pub fn stats(&self) -> SchedulerStats {
        self.with_scheduler(|sched| sched.stats())
    }

    /// Stack pool counters: `(allocated, deallocated, in_use)`.
    pub fn stack_stats(&self) -> (usize, usize, usize) {
        self.with_scheduler(|sched| sched.stack_pool().stats())
    }

    fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler<A>) -> R) -> R {
        let _guard = InterruptGuard::<A>::new();
        f(&mut self.scheduler.lock())
    }

    /// Carry out `transfer` and finish the switch once this thread resumes.
    ///
    /// # Safety
    ///
    /// Interrupts must be masked and `transfer` must come from the scheduler
    /// operation that was just performed.
    unsafe fn switch(&self, transfer: ArchTransfer<A>) {
        unsafe { A::context_switch(transfer.prev, transfer.next) };
        self.scheduler.lock().complete_switch();
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.with_scheduler(|sched| sched.assert_invariants());
    }
}

impl Runtime<DefaultArch> {
    /// Make this runtime the target of the crate-level free functions.
    ///
    /// The runtime must outlive all interrupt handling, which `'static`
    /// guarantees.
    pub fn register_global(&'static self) {
        GLOBAL_RUNTIME.store(self as *const _ as *mut (), Ordering::Release);
    }
}

/// Get the global runtime reference (for interrupt handlers).
///
/// Returns None if no runtime has been registered.
pub fn get_global_runtime() -> Option<&'static Runtime<DefaultArch>> {
    let ptr = GLOBAL_RUNTIME.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        // SAFETY: only `register_global` stores here, from a `'static` reference.
        Some(unsafe { &*(ptr as *const Runtime<DefaultArch>) })
    }
}

fn global() -> CothreadResult<&'static Runtime<DefaultArch>> {
    get_global_runtime().ok_or(InvalidOperationError::NotInitialized.into())
}

/// Yield the calling thread on the global runtime.
pub fn yield_now() -> CothreadResult<()> {
    global()?.yield_now()
}

/// Block the calling thread until `line` fires.
pub fn wait_for_interrupt(line: IrqLine) -> CothreadResult<()> {
    global()?.wait_for_interrupt(line)
}

/// Terminate the calling thread.
pub fn exit(code: i32) -> ! {
    match global() {
        Ok(runtime) => runtime.exit(code),
        Err(e) => panic!("cothread: exit without a runtime: {}", e),
    }
}

/// Interrupt layer hook: wake the threads waiting on `line`.
///
/// Does nothing until a runtime is registered.
pub fn on_interrupt(line: IrqLine) -> usize {
    get_global_runtime().map_or(0, |runtime| runtime.on_interrupt(line))
}

/// Interrupt layer hook taking a whole interrupt flags word.
pub fn on_interrupt_mask(mask: u32) -> usize {
    get_global_runtime().map_or(0, |runtime| runtime.on_interrupt_mask(mask))
}

/// Handle of the calling thread.
pub fn current() -> CothreadResult<ThreadHandle> {
    global()?.current()
}

/// First code every spawned thread runs.
extern "C" fn thread_start<A: Arch>(arg: usize) -> ! {
    // SAFETY: `arg` is the address `init` took from a `'static` runtime.
    let runtime = unsafe { &*(arg as *const Runtime<A>) };

    let entry = {
        let mut sched = runtime.scheduler.lock();
        sched.complete_switch();
        sched.take_entry()
    };
    A::enable_interrupts();

    let code = match entry {
        Some(entry) => entry(),
        None => {
            log::error!("cothread: thread started without a body");
            -1
        }
    };
    runtime.exit(code)
}
