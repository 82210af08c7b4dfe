use core::fmt;

use crate::{
    error::{Error, Result},
    interrupt::is_isr_context,
    mutex::wait_until,
    time::{Tick, deadline_after},
};

pub use ::spin::MutexGuard;

/// Non-recursive kernel mutex.
///
/// Locking the same [Mutex] twice from one task deadlocks; use
/// [RecursiveMutex](super::RecursiveMutex) when re-entry is needed.
pub struct Mutex<T: ?Sized> {
    inner: ::spin::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Mutex<T> {
        Mutex {
            inner: ::spin::Mutex::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Block until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        match wait_until(None, || self.inner.try_lock()) {
            Some(guard) => guard,
            None => unreachable!("unbounded wait returned without the lock"),
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Wait at most `timeout` ticks for the lock.
    ///
    /// Interrupt context may only poll, so a non-zero timeout there fails with
    /// [Error::IsrStatus].
    pub fn try_lock_for(&self, timeout: Tick) -> Result<MutexGuard<'_, T>> {
        if timeout != 0 && is_isr_context() {
            return Err(Error::IsrStatus);
        }
        wait_until(deadline_after(timeout), || self.inner.try_lock()).ok_or(Error::Timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("locked", &self.is_locked()).finish()
    }
}
