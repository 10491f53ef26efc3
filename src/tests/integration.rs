//! Integration tests with real context switches on the x86_64 host.
//!
//! Each test leaks its own runtime and adopts the test's OS thread as the
//! main thread. Assertions run on the main thread: a panic on a spawned
//! thread's stack cannot unwind past its start routine.

#[cfg(all(test, target_arch = "x86_64", target_os = "linux"))]
mod lifecycle_tests {
    use crate::arch::x86_64::HostArch;
    use crate::config::RuntimeConfig;
    use crate::errors::{CothreadError, InvalidOperationError, ResourceError};
    use crate::kernel::Runtime;
    use crate::sched::IrqLine;
    use crate::sync::CoMutex;
    use crate::thread::{ThreadBuilder, ThreadState};
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

    fn runtime_with(config: RuntimeConfig) -> &'static Runtime<HostArch> {
        let runtime: &'static Runtime<HostArch> = Box::leak(Box::new(Runtime::new(config)));
        runtime.init().expect("init");
        runtime
    }

    fn runtime() -> &'static Runtime<HostArch> {
        runtime_with(RuntimeConfig::new().default_stack_size(64 * 1024))
    }

    fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    #[test]
    fn test_join_returns_exit_code() {
        let rt = runtime();
        let a = rt.spawn(|| 42, 0, false).unwrap();
        let b = rt.spawn(move || rt.join(a).unwrap_or(-1), 0, false).unwrap();

        assert_eq!(rt.join(b), Ok(42));
        assert_eq!(
            rt.state(a),
            Err(CothreadError::InvalidOperation(InvalidOperationError::InvalidHandle))
        );
        assert_eq!(rt.stack_stats().2, 0);
        rt.assert_invariants();
    }

    #[test]
    fn test_detached_thread_woken_by_interrupt() {
        let rt = runtime();
        let irq = IrqLine::new(3).unwrap();
        let resumed = leak(AtomicBool::new(false));

        let c = rt
            .spawn(
                move || {
                    if rt.wait_for_interrupt(irq).is_ok() {
                        resumed.store(true, Ordering::SeqCst);
                    }
                    0
                },
                0,
                true,
            )
            .unwrap();

        rt.yield_now().unwrap();
        assert_eq!(rt.state(c), Ok(ThreadState::BlockedOnInterrupt));
        assert_eq!(rt.waiting_on(irq), 1);
        assert!(!resumed.load(Ordering::SeqCst));

        assert_eq!(rt.on_interrupt(irq), 1);
        rt.yield_now().unwrap();

        assert!(resumed.load(Ordering::SeqCst));
        assert_eq!(
            rt.state(c),
            Err(CothreadError::InvalidOperation(InvalidOperationError::InvalidHandle))
        );
        assert_eq!(rt.stack_stats().2, 0);
        assert_eq!(rt.on_interrupt(irq), 0);
        assert_eq!(rt.stats().live_threads, 1);
        rt.assert_invariants();
    }

    #[test]
    fn test_yields_interleave_in_fifo_order() {
        let rt = runtime();
        let log = leak(CoMutex::new(Vec::new()));

        let spawn_logger = move |tag: char| {
            rt.spawn(
                move || {
                    for i in 0..3 {
                        log.lock_in(rt).push((tag, i));
                        if rt.yield_now().is_err() {
                            return -1;
                        }
                    }
                    tag as i32
                },
                0,
                false,
            )
            .unwrap()
        };
        let a = spawn_logger('a');
        let b = spawn_logger('b');

        assert_eq!(rt.join(a), Ok('a' as i32));
        assert_eq!(rt.join(b), Ok('b' as i32));
        assert_eq!(
            *log.lock_in(rt),
            [('a', 0), ('b', 0), ('a', 1), ('b', 1), ('a', 2), ('b', 2)]
        );
    }

    #[test]
    fn test_exit_code_independent_of_yield_count() {
        let rt = runtime();
        for yields in [0u32, 1, 7] {
            let t = rt
                .spawn(
                    move || {
                        for _ in 0..yields {
                            if rt.yield_now().is_err() {
                                return -1;
                            }
                        }
                        100 + yields as i32
                    },
                    0,
                    false,
                )
                .unwrap();

            // Keep yielding so the worker also runs while main is ready
            for _ in 0..yields {
                rt.yield_now().unwrap();
            }
            assert_eq!(rt.join(t), Ok(100 + yields as i32));
        }
        assert_eq!(rt.stats().live_threads, 1);
    }

    #[test]
    fn test_exited_thread_readable_until_joined() {
        let rt = runtime();
        let t = rt.spawn(|| 7, 0, false).unwrap();

        rt.yield_now().unwrap();
        assert_eq!(rt.state(t), Ok(ThreadState::Exited));
        assert_eq!(rt.exit_code(t), Ok(7));
        assert_eq!(rt.try_join(t), Ok(Some(7)));
        assert_eq!(
            rt.join(t),
            Err(CothreadError::InvalidOperation(InvalidOperationError::InvalidHandle))
        );
    }

    #[test]
    fn test_detach_blocked_thread_defers_reclaim() {
        let rt = runtime();
        let irq = IrqLine::new(9).unwrap();
        let t = rt
            .spawn(move || rt.wait_for_interrupt(irq).map_or(-1, |_| 0), 0, false)
            .unwrap();

        rt.yield_now().unwrap();
        rt.detach(t).unwrap();
        assert_eq!(rt.is_detached(t), Ok(true));
        assert_eq!(rt.stack_stats().2, 1);

        rt.on_interrupt_mask(irq.mask());
        rt.yield_now().unwrap();
        assert!(rt.state(t).is_err());
        assert_eq!(rt.stack_stats().2, 0);
    }

    #[test]
    fn test_comutex_holder_keeps_lock_across_yields() {
        let rt = runtime();
        let counter = leak(CoMutex::new(0u32));
        let contended = leak(AtomicUsize::new(0));

        for _ in 0..3 {
            rt.spawn(
                move || {
                    for _ in 0..4 {
                        if counter.is_locked() {
                            contended.fetch_add(1, Ordering::SeqCst);
                        }
                        let mut guard = counter.lock_in(rt);
                        let seen = *guard;
                        // Others run while the lock is held
                        if rt.yield_now().is_err() {
                            return -1;
                        }
                        *guard = seen + 1;
                    }
                    0
                },
                0,
                true,
            )
            .unwrap();
        }

        while rt.stats().live_threads > 1 {
            rt.yield_now().unwrap();
        }
        assert_eq!(*counter.lock_in(rt), 12);
        assert!(contended.load(Ordering::SeqCst) > 0);
        assert_eq!(rt.stack_stats().2, 0);
    }

    #[test]
    fn test_idle_thread_keeps_waiters_schedulable() {
        let rt = runtime();
        rt.spawn_idle().unwrap();
        let irq = IrqLine::new(5).unwrap();

        // Plays the interrupt controller
        rt.spawn(move || rt.on_interrupt(irq) as i32, 0, true).unwrap();

        rt.wait_for_interrupt(irq).unwrap();
        assert_eq!(rt.stats().interrupt_wakeups, 1);
        assert_eq!(rt.name(rt.current().unwrap()), Ok(Some("main".into())));
    }

    #[test]
    fn test_spawn_limits() {
        let rt = runtime_with(RuntimeConfig::new().max_threads(2).default_stack_size(16 * 1024));
        let t = ThreadBuilder::new()
            .name("only")
            .spawn_on(rt, || 1)
            .unwrap();
        assert_eq!(
            rt.spawn(|| 0, 0, false),
            Err(CothreadError::ResourceExhausted(ResourceError::TooManyThreads))
        );
        assert_eq!(rt.name(t), Ok(Some("only".into())));
        assert_eq!(rt.join(t), Ok(1));

        // The slot is free again
        let again = rt.spawn(|| 2, 0, false).unwrap();
        assert_eq!(rt.join(again), Ok(2));
    }

    #[test]
    fn test_init_twice_rejected() {
        let rt = runtime();
        assert_eq!(
            rt.init(),
            Err(CothreadError::InvalidOperation(InvalidOperationError::AlreadyInitialized))
        );
        assert!(rt.is_initialized());
    }
}
