// src/client/handlers.rs

//! Method name → handler registry.
//!
//! At most one handler is registered per method; registering again
//! overwrites. Every [`Handler`] carries a [`HandlerId`] so a caller can
//! unregister "only if it is still mine" without comparing closures.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{lock_ignore_poison, Link};
use crate::Envelope;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type HandlerFn = dyn Fn(&Link, &Envelope) + Send + Sync;

/// Callback invoked for each inbound envelope whose `method` it is
/// registered under.
///
/// Handlers run synchronously on the connection's reader task. Long-running
/// work should be spawned; sending from a handler goes through
/// [`Link::send_message`] inside a spawned task.
///
/// Clones share the same [`HandlerId`].
#[derive(Clone)]
pub struct Handler {
    // ---
    id: HandlerId,
    f: Arc<HandlerFn>,
}

impl Handler {
    // ---
    /// Wrap a closure as a handler with a fresh identity.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Link, &Envelope) + Send + Sync + 'static,
    {
        Self::from_parts(HandlerId::next(), f)
    }

    /// Build a handler with a pre-allocated identity, for closures that need
    /// to know their own id.
    pub(crate) fn from_parts<F>(id: HandlerId, f: F) -> Self
    where
        F: Fn(&Link, &Envelope) + Send + Sync + 'static,
    {
        Self { id, f: Arc::new(f) }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn call(&self, link: &Link, env: &Envelope) {
        (self.f)(link, env)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("id", &self.id).finish()
    }
}

/// Shared handler registry.
///
/// Every operation takes the lock for one short critical section. Lookups
/// return a clone so the caller invokes the handler with no lock held.
#[derive(Default)]
pub(crate) struct HandlerTable {
    map: Mutex<HashMap<String, Handler>>,
}

impl HandlerTable {
    // ---
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, returning the handler it replaced.
    pub(crate) fn insert(&self, method: &str, handler: Handler) -> Option<Handler> {
        lock_ignore_poison(&self.map).insert(method.to_string(), handler)
    }

    /// Remove the handler for `method`.
    ///
    /// With `expected`, removes only if the registered handler has the same
    /// identity. Returns `true` if something was removed.
    pub(crate) fn remove(&self, method: &str, expected: Option<&Handler>) -> bool {
        // ---
        match expected {
            Some(handler) => self.remove_id(method, handler.id()),
            None => lock_ignore_poison(&self.map).remove(method).is_some(),
        }
    }

    /// Remove the handler for `method` if its identity is `id`.
    pub(crate) fn remove_id(&self, method: &str, id: HandlerId) -> bool {
        // ---
        let mut map = lock_ignore_poison(&self.map);
        match map.get(method) {
            Some(current) if current.id() == id => {
                map.remove(method);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn get(&self, method: &str) -> Option<Handler> {
        lock_ignore_poison(&self.map).get(method).cloned()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, method: &str) -> bool {
        lock_ignore_poison(&self.map).contains_key(method)
    }
}
