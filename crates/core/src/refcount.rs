//! Reference counting primitive (component A).
//!
//! Every shared runtime object (ubuf payload, uref, pipe) is built on top of
//! [`RefCounted`]. Rust's `Arc` already gives us the atomic counter and the
//! acquire/release ordering the spec demands; what it does not give us is a
//! release *callback* fired exactly once when the last strong reference
//! drops, so we wrap it in a thin `Inner<T>` that carries one.

use std::sync::{Arc, Weak};

struct Inner<T> {
    value: T,
    on_release: Option<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.on_release.take() {
            cb(&self.value);
        }
    }
}

/// A reference-counted handle with an optional release callback.
///
/// `use_()` is simply `Clone`; `release()` is simply `drop`; `dead()` is
/// answered by taking a [`RefWeak`] and calling `upgrade()`.
pub struct RefCounted<T> {
    inner: Arc<Inner<T>>,
}

impl<T> RefCounted<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner { value, on_release: None }),
        }
    }

    /// Builds a handle whose `on_release` callback fires exactly once, when
    /// the strong count reaches zero.
    pub fn with_release<F>(value: T, on_release: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner { value, on_release: Some(Box::new(on_release)) }),
        }
    }

    /// Adds a reference (`use(r)` in the spec's vocabulary).
    #[must_use]
    pub fn use_(&self) -> Self {
        self.clone()
    }

    /// Number of outstanding strong references.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// A non-owning handle that can later ask whether the value is dead.
    #[must_use]
    pub fn weak(&self) -> RefWeak<T> {
        RefWeak { inner: Arc::downgrade(&self.inner) }
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> std::ops::Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

/// A weak handle used to answer `dead(r)`: once every [`RefCounted`] clone
/// has been released, `upgrade()` returns `None`.
pub struct RefWeak<T> {
    inner: Weak<Inner<T>>,
}

impl<T> RefWeak<T> {
    #[must_use]
    pub fn dead(&self) -> bool {
        self.inner.strong_count() == 0
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<RefCounted<T>> {
        self.inner.upgrade().map(|inner| RefCounted { inner })
    }
}

impl<T> Clone for RefWeak<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn release_callback_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let rc = RefCounted::with_release(42, move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        let weak = rc.weak();
        assert!(!weak.dead());

        let rc2 = rc.use_();
        assert_eq!(rc.strong_count(), 2);
        drop(rc2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        drop(rc);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(weak.dead());
    }

    #[test]
    fn weak_upgrade_fails_once_dead() {
        let rc = RefCounted::new(7);
        let weak = rc.weak();
        drop(rc);
        assert!(weak.upgrade().is_none());
    }
}
