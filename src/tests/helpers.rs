//! Test helper utilities and common functionality.

use crate::arch::NoOpArch;
use crate::config::RuntimeConfig;
use crate::sched::{ArchTransfer, Launch, Scheduler};
use crate::thread::{ThreadBuilder, ThreadHandle};
use alloc::boxed::Box;

/// Scheduler driven by the test body, which stands in for whichever thread
/// is current.
pub type TestScheduler = Scheduler<NoOpArch>;

extern "C" fn never_started(_arg: usize) -> ! {
    unreachable!("NoOpArch never enters a thread");
}

pub fn config() -> RuntimeConfig {
    RuntimeConfig::new().default_stack_size(1024)
}

pub fn scheduler() -> TestScheduler {
    scheduler_with(config())
}

pub fn scheduler_with(config: RuntimeConfig) -> TestScheduler {
    let mut sched = Scheduler::new(config);
    sched
        .bootstrap(Launch {
            start: never_started,
            arg: 0,
        })
        .expect("bootstrap");
    sched
}

pub fn spawn(sched: &mut TestScheduler, detached: bool) -> ThreadHandle {
    sched
        .spawn(ThreadBuilder::new().detached(detached), Box::new(|| 0))
        .expect("spawn")
}

/// Finish a switch the way a resumed thread does and return who runs now.
pub fn land(sched: &mut TestScheduler, transfer: ArchTransfer<NoOpArch>) -> ThreadHandle {
    sched.complete_switch();
    assert_eq!(sched.current().unwrap(), transfer.to);
    transfer.to
}

/// Yield until `target` is the running thread.
pub fn run_until(sched: &mut TestScheduler, target: ThreadHandle) {
    for _ in 0..64 {
        if sched.current().unwrap() == target {
            return;
        }
        let transfer = sched.yield_now().unwrap().expect("nothing else ready");
        land(sched, transfer);
    }
    panic!("thread {:?} never became current", target);
}

/// Simple linear congruential generator for property testing.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 16
    }

    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }

    pub fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }
}
