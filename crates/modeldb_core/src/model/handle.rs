//! Shared instance handles.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A shared handle to a model instance.
///
/// Handles compare and hash by identity, not by content: two handles are
/// equal only if they point at the same instance. Mutation of a stored
/// instance goes through its store so that indexes stay consistent.
pub struct Handle<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Handle<T> {
    /// Wraps a new instance.
    pub fn new(instance: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(instance)),
        }
    }

    /// Locks the instance for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Returns `true` if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }

    /// Hash of the instance's address, the seed for its store id.
    pub(crate) fn identity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.address().hash(&mut hasher);
        hasher.finish()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_identity() {
        let a = Handle::new(String::from("same"));
        let b = Handle::new(String::from("same"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.identity_hash(), a.clone().identity_hash());
    }

    #[test]
    fn writes_are_visible_through_clones() {
        let a = Handle::new(1_u32);
        let b = a.clone();
        *a.write() = 2;
        assert_eq!(*b.read(), 2);
    }
}
