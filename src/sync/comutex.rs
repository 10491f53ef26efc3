//! Mutex that yields to other threads while it waits.
//!
//! A thread that finds the lock taken gives up the CPU instead of spinning,
//! so the holder, which can only make progress when scheduled, gets to run
//! and release it.

use crate::arch::Arch;
use crate::kernel::{self, Runtime};
use core::ops::{Deref, DerefMut};

pub struct CoMutex<T> {
    inner: spin::Mutex<T>,
}

impl<T> CoMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<CoMutexGuard<'_, T>> {
        self.inner.try_lock().map(|inner| CoMutexGuard { inner })
    }

    /// Acquire the lock, yielding on the global runtime while it is held.
    pub fn lock(&self) -> CoMutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            if kernel::yield_now().is_err() {
                core::hint::spin_loop();
            }
        }
    }

    /// Acquire the lock, yielding on `runtime` while it is held.
    pub fn lock_in<A: Arch>(&self, runtime: &Runtime<A>) -> CoMutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            if runtime.yield_now().is_err() {
                core::hint::spin_loop();
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for CoMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct CoMutexGuard<'a, T> {
    inner: spin::MutexGuard<'a, T>,
}

impl<'a, T> Deref for CoMutexGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T> DerefMut for CoMutexGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_lock_excludes() {
        let mutex = CoMutex::new(5);
        let mut guard = mutex.try_lock().unwrap();
        *guard += 1;
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_none());

        drop(guard);
        assert_eq!(*mutex.lock(), 6);
        assert_eq!(mutex.into_inner(), 6);
    }
}
