//! Ownership bridge between engine wrappers and foreign (Rapier-side) objects
//!
//! A [`ForeignHandle`] owns exactly one foreign object and releases it exactly
//! once. A [`ForeignRef`] names a foreign object someone else releases. The
//! distinction is carried by the type, never by a swapped-out deleter.
//!
//! Both are generic over the owner `S` (the container that actually holds the
//! foreign objects) and only keep a weak reference to it: once the owner is
//! gone, every foreign object went with it and releasing becomes a no-op.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Releases a foreign object from its owner
pub type ReleaseFn<K, S> = fn(&mut S, K);

/// Owning handle to a foreign object
///
/// The owner must not be locked by the current thread while a handle is
/// dropped or accessed.
pub struct ForeignHandle<K: Copy, S> {
    key: K,
    owner: Weak<Mutex<S>>,
    release: Option<ReleaseFn<K, S>>,
}

impl<K: Copy, S> ForeignHandle<K, S> {
    /// Take ownership of a freshly allocated foreign object.
    ///
    /// A failed allocation (`None`) produces no handle, so nothing can ever
    /// release an object that does not exist.
    pub fn wrap(key: Option<K>, owner: &Arc<Mutex<S>>, release: ReleaseFn<K, S>) -> Option<Self> {
        key.map(|key| Self {
            key,
            owner: Arc::downgrade(owner),
            release: Some(release),
        })
    }

    /// Foreign key of the owned object
    pub fn key(&self) -> K {
        self.key
    }

    /// Run `f` against the owner and the owned key.
    ///
    /// Returns `None` if the owner has been dropped.
    pub fn with<R>(&self, f: impl FnOnce(&mut S, K) -> R) -> Option<R> {
        let owner = self.owner.upgrade()?;
        let mut guard = owner.lock();
        Some(f(&mut guard, self.key))
    }

    /// Non-owning view of the same object
    pub fn borrow(&self) -> ForeignRef<K, S> {
        ForeignRef {
            key: self.key,
            owner: self.owner.clone(),
        }
    }

    /// Hand release responsibility to someone else (usually a composite
    /// whose own teardown deletes this object).
    pub fn transfer(mut self) -> ForeignRef<K, S> {
        self.release = None;
        self.borrow()
    }

    /// Release the foreign object now instead of at drop
    pub fn release(self) {
        drop(self);
    }

    /// Whether the owner is still alive
    pub fn is_owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

impl<K: Copy, S> Drop for ForeignHandle<K, S> {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        if let Some(owner) = self.owner.upgrade() {
            let mut guard = owner.lock();
            release(&mut guard, self.key);
        }
    }
}

impl<K: Copy + fmt::Debug, S> fmt::Debug for ForeignHandle<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("key", &self.key)
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// Non-owning reference to a foreign object
pub struct ForeignRef<K: Copy, S> {
    key: K,
    owner: Weak<Mutex<S>>,
}

impl<K: Copy, S> ForeignRef<K, S> {
    /// Reference an object owned (and released) elsewhere
    pub fn new(key: K, owner: &Arc<Mutex<S>>) -> Self {
        Self {
            key,
            owner: Arc::downgrade(owner),
        }
    }

    /// Foreign key of the referenced object
    pub fn key(&self) -> K {
        self.key
    }

    /// Run `f` against the owner and the referenced key.
    ///
    /// Returns `None` if the owner has been dropped.
    pub fn with<R>(&self, f: impl FnOnce(&mut S, K) -> R) -> Option<R> {
        let owner = self.owner.upgrade()?;
        let mut guard = owner.lock();
        Some(f(&mut guard, self.key))
    }
}

impl<K: Copy, S> Clone for ForeignRef<K, S> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            owner: self.owner.clone(),
        }
    }
}

impl<K: Copy + fmt::Debug, S> fmt::Debug for ForeignRef<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ForeignRef").field(&self.key).finish()
    }
}

/// Either an owning or a borrowing link to a foreign object
pub enum ForeignLink<K: Copy, S> {
    /// The wrapper releases the object
    Owned(ForeignHandle<K, S>),
    /// Something else (typically a composite) releases the object
    Borrowed(ForeignRef<K, S>),
}

impl<K: Copy, S> ForeignLink<K, S> {
    /// Foreign key of the linked object
    pub fn key(&self) -> K {
        match self {
            Self::Owned(handle) => handle.key(),
            Self::Borrowed(reference) => reference.key(),
        }
    }

    /// Whether dropping this link releases the object
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Run `f` against the owner and the linked key
    pub fn with<R>(&self, f: impl FnOnce(&mut S, K) -> R) -> Option<R> {
        match self {
            Self::Owned(handle) => handle.with(f),
            Self::Borrowed(reference) => reference.with(f),
        }
    }
}

impl<K: Copy + fmt::Debug, S> fmt::Debug for ForeignLink<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(handle) => handle.fmt(f),
            Self::Borrowed(reference) => reference.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Ledger {
        live: HashSet<u32>,
        released: Vec<u32>,
        next: u32,
    }

    impl Ledger {
        fn allocate(&mut self) -> Option<u32> {
            self.next += 1;
            self.live.insert(self.next);
            Some(self.next)
        }
    }

    fn release(ledger: &mut Ledger, key: u32) {
        assert!(ledger.live.remove(&key), "double release of {key}");
        ledger.released.push(key);
    }

    #[test]
    fn test_release_exactly_once() {
        let owner = Arc::new(Mutex::new(Ledger::default()));
        let key = owner.lock().allocate();
        let handle = ForeignHandle::wrap(key, &owner, release).unwrap();
        let view = handle.borrow();

        drop(view);
        assert!(owner.lock().released.is_empty());

        drop(handle);
        let ledger = owner.lock();
        assert_eq!(ledger.released, vec![1]);
        assert!(ledger.live.is_empty());
    }

    #[test]
    fn test_wrap_null_is_empty() {
        let owner = Arc::new(Mutex::new(Ledger::default()));
        let handle = ForeignHandle::<u32, Ledger>::wrap(None, &owner, release);
        assert!(handle.is_none());
        assert!(owner.lock().released.is_empty());
    }

    #[test]
    fn test_transfer_disarms_release() {
        let owner = Arc::new(Mutex::new(Ledger::default()));
        let key = owner.lock().allocate();
        let handle = ForeignHandle::wrap(key, &owner, release).unwrap();

        let reference = handle.transfer();
        assert_eq!(reference.key(), 1);
        drop(reference);

        let ledger = owner.lock();
        assert!(ledger.released.is_empty());
        assert!(ledger.live.contains(&1));
    }

    #[test]
    fn test_release_after_owner_gone_is_noop() {
        let owner = Arc::new(Mutex::new(Ledger::default()));
        let key = owner.lock().allocate();
        let handle = ForeignHandle::wrap(key, &owner, release).unwrap();

        drop(owner);
        assert!(!handle.is_owner_alive());
        assert!(handle.with(|_, _| ()).is_none());
        drop(handle);
    }

    #[test]
    fn test_link_ownership() {
        let owner = Arc::new(Mutex::new(Ledger::default()));
        let a = owner.lock().allocate();
        let b = owner.lock().allocate();

        let owned = ForeignLink::Owned(ForeignHandle::wrap(a, &owner, release).unwrap());
        let borrowed = ForeignLink::Borrowed(ForeignRef::new(b.unwrap(), &owner));
        assert!(owned.is_owned());
        assert!(!borrowed.is_owned());

        drop(owned);
        drop(borrowed);
        assert_eq!(owner.lock().released, vec![1]);
    }
}
