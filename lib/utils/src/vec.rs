//! Lock-guarded ordered collections.
//!
//! [LockedVec] is the storage behind every kernel ledger: insertion order is preserved,
//! lookups are linear and the whole collection is serialized by one lock.
//! Visitors passed to [LockedVec::for_each] run with the lock held; **they must not
//! mutate the same collection**, or the calling hart spins forever.
use alloc::{vec, vec::Vec};
use core::fmt::Debug;
use spin::RwLock;

pub struct LockedVec<T> {
    inner: RwLock<Vec<T>>,
}

impl<T> LockedVec<T> {
    pub const fn new() -> LockedVec<T> {
        LockedVec {
            inner: RwLock::new(vec![]),
        }
    }

    /// Append a value and return its index at the time of insertion.
    pub fn push(&self, value: T) -> usize {
        let mut guard = self.inner.write();
        let index = guard.len();
        guard.push(value);
        index
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Remove the first element matching `pred`, keeping the order of the rest.
    pub fn remove_first(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut guard = self.inner.write();
        let index = guard.iter().position(|value| pred(value))?;
        Some(guard.remove(index))
    }

    pub fn any(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.inner.read().iter().any(|value| pred(value))
    }

    /// Visit elements in insertion order until `visitor` returns `false`.
    pub fn for_each(&self, mut visitor: impl FnMut(&T) -> bool) {
        let guard = self.inner.read();
        for value in guard.iter() {
            if !visitor(value) {
                break;
            }
        }
    }
}

impl<T: Clone> LockedVec<T> {
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        self.inner.read().iter().find(|value| pred(value)).cloned()
    }

    /// Copy the current contents, so the caller can work without holding the lock.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.read().clone()
    }
}

impl<T> Default for LockedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug> Debug for LockedVec<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:?}", &*self.inner.read()))
    }
}

#[cfg(test)]
mod tests {
    use super::LockedVec;

    #[test]
    fn remove_first_keeps_order() {
        let list = LockedVec::new();
        for value in [1, 2, 3, 2] {
            list.push(value);
        }
        assert_eq!(list.remove_first(|v| *v == 2), Some(2));
        assert_eq!(list.snapshot(), [1, 3, 2]);
        assert_eq!(list.remove_first(|v| *v == 7), None);
    }

    #[test]
    fn for_each_stops_when_visitor_returns_false() {
        let list = LockedVec::new();
        for value in 0..10 {
            list.push(value);
        }
        let mut seen = 0;
        list.for_each(|v| {
            seen += 1;
            *v < 3
        });
        assert_eq!(seen, 4);
    }
}
