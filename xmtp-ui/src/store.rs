//! Subscribable keyed store mapping identity keys to [`AsyncState`]s.
//!
//! Stores are explicitly constructed and passed around (typically inside a
//! [`Stores`](crate::session::Stores) bundle owned by a
//! [`Session`](crate::session::Session)); nothing here is a process-wide
//! singleton, so each test or embedded session gets fresh state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::state::{AsyncState, StateId, WireState, is_legal_transition};

/// Identifier returned by [`Store::subscribe`], used to unsubscribe.
pub type SubscriberId = u64;

type Subscriber = Arc<dyn Fn(&str, &WireState) + Send + Sync>;

struct Inner<T> {
    entries: Mutex<HashMap<String, AsyncState<T>>>,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber: AtomicU64,
}

/// A subscribable key-value mapping from identity key to [`AsyncState`].
///
/// Cloning is cheap and shares the underlying map. Unknown keys read as
/// [`AsyncState::Idle`], never as an absent value.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl<T> Store<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber invoked synchronously with `(key, wire_state)`
    /// on every applied change. Payload data never reaches subscribers; they
    /// see the wire-safe [`WireState`] projection.
    pub fn subscribe(&self, f: impl Fn(&str, &WireState) + Send + Sync + 'static) -> SubscriberId {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .expect("store subscribers lock")
            .push((id, Arc::new(f)));
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner
            .subscribers
            .lock()
            .expect("store subscribers lock")
            .retain(|(sid, _)| *sid != id);
    }

    /// All keys with a stored entry.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .expect("store entries lock")
            .keys()
            .cloned()
            .collect()
    }

    fn notify(&self, key: &str, wire: &WireState) {
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .lock()
            .expect("store subscribers lock")
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for f in subscribers {
            f(key, wire);
        }
    }
}

impl<T: Clone> Store<T> {
    /// Current state for `key`; [`AsyncState::Idle`] when unknown.
    #[must_use]
    pub fn get(&self, key: &str) -> AsyncState<T> {
        self.inner
            .entries
            .lock()
            .expect("store entries lock")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Apply a guarded transition.
    ///
    /// The new state is stored only if `(current.id, next.id)` is in the
    /// legal-transition table; otherwise the store is left unchanged and
    /// `false` is returned. Subscribers are notified synchronously on every
    /// applied transition.
    pub fn set(&self, key: &str, next: AsyncState<T>) -> bool {
        let wire = {
            let mut entries = self.inner.entries.lock().expect("store entries lock");
            let current = entries.get(key).map_or(StateId::Idle, AsyncState::id);
            if !is_legal_transition(current, next.id()) {
                return false;
            }
            let wire = next.to_wire();
            entries.insert(key.to_owned(), next);
            wire
        };
        self.notify(key, &wire);
        true
    }

    /// Apply a functional update without the transition guard.
    ///
    /// Used by the data-aggregation stores (messages, previews,
    /// peer-on-network), whose repeat-fetch cycles are not expressible in
    /// the lifecycle transition table. Subscribers are notified.
    pub fn update(&self, key: &str, f: impl FnOnce(AsyncState<T>) -> AsyncState<T>) {
        let wire = {
            let mut entries = self.inner.entries.lock().expect("store entries lock");
            let current = entries.get(key).cloned().unwrap_or_default();
            let next = f(current);
            let wire = next.to_wire();
            entries.insert(key.to_owned(), next);
            wire
        };
        self.notify(key, &wire);
    }
}
