//! Standard request plumbing (component M).
//!
//! Requests flow opposite to data: a pipe registers a request for an
//! ancillary resource (a ubuf manager matched to a flow def, a uref
//! manager, a clock, a pump manager, a flow-format amendment) and it
//! bubbles upward until some probe or upstream pipe provides it. This is
//! the teacher's content-addressed resource-sharing pattern (dedupe by
//! key, refcount until last release, provide synchronously or later)
//! generalized from a single resource kind to any `T`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// A single outstanding request for a resource of type `T`. Provision may
/// be immediate (the registering call synchronously invokes `provide`) or
/// asynchronous (some later event calls it); re-providing is allowed and
/// simply overwrites the cached response, since provision is idempotent
/// w.r.t. the last provide for a given request (§5).
pub struct Request<T> {
    provide: Box<dyn Fn(&T)>,
    cached: RefCell<Option<T>>,
}

impl<T: Clone> Request<T> {
    pub fn new(provide: impl Fn(&T) + 'static) -> Self {
        Self { provide: Box::new(provide), cached: RefCell::new(None) }
    }

    /// Fills (or re-fills) this request, invoking the registered callback.
    pub fn provide(&self, value: T) {
        (self.provide)(&value);
        self.cached.replace(Some(value));
    }

    #[must_use]
    pub fn cached(&self) -> Option<T> {
        self.cached.borrow().clone()
    }
}

/// Per-pipe registry of outstanding requests for one resource kind, keyed
/// by whatever distinguishes instances of that kind (e.g. a flow-def
/// string for ubuf-manager requests). Registering the same key twice
/// shares the existing request rather than creating a duplicate —
/// content-addressed sharing, exactly as the teacher's resource manager
/// dedupes by key.
pub struct RequestRegistry<K, T> {
    requests: RefCell<HashMap<K, Rc<Request<T>>>>,
}

impl<K, T> Default for RequestRegistry<K, T> {
    fn default() -> Self {
        Self { requests: RefCell::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> RequestRegistry<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request under `key`, reusing an existing one if present.
    /// Returns the request so the caller can synchronously provide it when
    /// an answer is already on hand.
    pub fn register(&self, key: K, request: Request<T>) -> Rc<Request<T>> {
        let mut requests = self.requests.borrow_mut();
        Rc::clone(requests.entry(key).or_insert_with(|| Rc::new(request)))
    }

    /// Removes the request from the registry, returning it if it was
    /// present. This is the only way a request leaves the upstream chain.
    pub fn unregister(&self, key: &K) -> Option<Rc<Request<T>>> {
        self.requests.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<Rc<Request<T>>> {
        self.requests.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.borrow().is_empty()
    }
}
