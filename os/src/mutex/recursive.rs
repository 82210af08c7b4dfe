use core::{
    fmt,
    marker::PhantomData,
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::{Error, Result},
    interrupt::is_isr_context,
    mutex::wait_until,
    task::tid::current_tid,
    time::{Tick, deadline_after},
};

/// Mutex that the owning task may lock again without deadlocking.
///
/// Every successful lock returns a guard; the mutex is released when the last guard of the
/// owner is dropped. Only shared access is handed out since several guards may coexist.
pub struct RecursiveMutex<T: ?Sized> {
    raw: ::spin::Mutex<()>,
    /// Task id of the holder, `0` while free.
    owner: AtomicUsize,
    /// Only modified by the holder.
    count: AtomicUsize,
    data: T,
}

unsafe impl<T: ?Sized + Send> Send for RecursiveMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for RecursiveMutex<T> {}

impl<T> RecursiveMutex<T> {
    pub const fn new(value: T) -> RecursiveMutex<T> {
        RecursiveMutex {
            raw: ::spin::Mutex::new(()),
            owner: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            data: value,
        }
    }
}

impl<T: ?Sized> RecursiveMutex<T> {
    pub fn lock(&self) -> RecursiveMutexGuard<'_, T> {
        match self.acquire(None) {
            Some(guard) => guard,
            None => unreachable!("unbounded wait returned without the lock"),
        }
    }

    pub fn try_lock(&self) -> Option<RecursiveMutexGuard<'_, T>> {
        self.acquire(deadline_after(0))
    }

    /// Wait at most `timeout` ticks. Re-entry by the owner never waits.
    pub fn try_lock_for(&self, timeout: Tick) -> Result<RecursiveMutexGuard<'_, T>> {
        if timeout != 0 && is_isr_context() {
            return Err(Error::IsrStatus);
        }
        self.acquire(deadline_after(timeout)).ok_or(Error::Timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }

    /// Depth of the current hold, `0` while free.
    pub fn lock_count(&self) -> usize {
        if self.is_locked() {
            self.count.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    fn acquire(&self, deadline: Option<std::time::Instant>) -> Option<RecursiveMutexGuard<'_, T>> {
        let me = current_tid();
        if self.owner.load(Ordering::Acquire) == me {
            self.count.fetch_add(1, Ordering::Relaxed);
            return Some(RecursiveMutexGuard::new(self));
        }
        let raw = wait_until(deadline, || self.raw.try_lock())?;
        // released by the last guard through force_unlock
        core::mem::forget(raw);
        self.count.store(1, Ordering::Relaxed);
        self.owner.store(me, Ordering::Release);
        Some(RecursiveMutexGuard::new(self))
    }
}

impl<T: ?Sized> fmt::Debug for RecursiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .field("count", &self.lock_count())
            .finish()
    }
}

pub struct RecursiveMutexGuard<'a, T: ?Sized> {
    mutex: &'a RecursiveMutex<T>,
    // released on the task that acquired it
    _marker: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> RecursiveMutexGuard<'a, T> {
    fn new(mutex: &'a RecursiveMutex<T>) -> Self {
        RecursiveMutexGuard {
            mutex,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for RecursiveMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.mutex.data
    }
}

impl<T: ?Sized> Drop for RecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        if self.mutex.count.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.mutex.owner.store(0, Ordering::Release);
            unsafe { self.mutex.raw.force_unlock() };
        }
    }
}
