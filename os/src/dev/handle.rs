//! Lightweight handle types for shared ownership and weak back-references.
//!
//! Provide two complementary handle types:
//! - [Handle<T>] owns a strong reference to an object using [alloc::sync::Arc]. Ledgers,
//!   parent devices (for their children) and bindings keep kernel objects alive through it.
//! - [HandleRef<T>] stores a weak reference ([alloc::sync::Weak]) and is suitable for parent
//!   pointers or other non-owning references that must not keep the target alive.
//!
//! Key guarantees and semantics:
//! - Call [Handle::create_ref] to derive a [HandleRef] from an existing strong [Handle].
//! - Call [HandleRef::get_handle] to attempt an upgrade; it returns [None] if the strong owner(s)
//!   have dropped the object. **Consumers must handle the [None] case explicitly.**
//! - Handles compare by identity, never by value: two devices with equal names are still
//!   distinct entries of a ledger.
use alloc::{sync::Arc, sync::Weak};
use core::{fmt, ops::Deref};

/// Strong owning handle backed by [Arc<T>].
///
/// The inner value is reference-counted; cloning the handle increments the count.
/// Use [Handle<T>::create_ref] to produce a weak [HandleRef<T>] suitable for parent pointers.
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Handle<T> {
    pub fn new(value: T) -> Handle<T> {
        Handle::from(value)
    }

    /// Create a non-owning [HandleRef<T>] that refers to the same underlying object.
    ///
    /// The returned [HandleRef<T>] does not increment the strong reference count and
    /// must be upgraded with [HandleRef::get_handle] before use.
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Weak (non-owning) handle backed by [Weak<T>].
///
/// A [HandleRef<T>] represents an optional reference to an object which may be destroyed
/// independently of the referrers. Use [HandleRef<T>::get_handle] to attempt to obtain a strong [Handle<T>].
pub struct HandleRef<T> {
    inner: Weak<T>,
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> HandleRef<T> {
    /// Attempt to upgrade the weak reference into a strong [Handle<T>].
    ///
    /// Return `Some(Handle<T>)` if the target is still alive, otherwise return `None`.
    /// **Always check the result** before dereferencing the returned handle.
    pub fn get_handle(&self) -> Option<Handle<T>> {
        Weak::upgrade(&self.inner).map(|inner| Handle { inner })
    }

    /// Whether this reference points at the object behind `handle`.
    pub fn refers_to(&self, handle: &Handle<T>) -> bool {
        Weak::as_ptr(&self.inner) == Arc::as_ptr(&handle.inner)
    }
}

impl<T> fmt::Debug for HandleRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRef")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_ref_does_not_keep_target_alive() {
        let handle = Handle::new(5);
        let weak = handle.create_ref();
        assert!(weak.refers_to(&handle));
        assert_eq!(*weak.get_handle().unwrap(), 5);
        drop(handle);
        assert!(weak.get_handle().is_none());
    }

    #[test]
    fn equality_is_identity() {
        let a = Handle::new(1);
        let b = Handle::new(1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
