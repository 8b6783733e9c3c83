//! Callback registries shared by the managers.
//!
//! Every manager that lets callers observe it hands out a [`Subscription`].
//! Dropping a subscription does nothing; it has to be unsubscribed
//! explicitly, the same way an unsubscribe closure would be called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every `subscribe` call.
#[must_use = "a subscription that is never unsubscribed lives as long as its registry"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes the callback from its registry.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered set of callbacks.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(callback)));
            id
        };
        let weak: Weak<Mutex<ListenerSet<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invokes every callback in registration order.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every callback.
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct KeyedSet<T> {
    next_id: u64,
    by_key: HashMap<String, Vec<(u64, Callback<T>)>>,
}

/// Callbacks indexed by key.
///
/// A key disappears from the registry with its last callback.
pub struct KeyedListeners<T> {
    inner: Arc<Mutex<KeyedSet<T>>>,
}

impl<T: 'static> KeyedListeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(KeyedSet {
                next_id: 0,
                by_key: HashMap::new(),
            })),
        }
    }

    /// Registers a callback for `key`.
    pub fn subscribe(
        &self,
        key: &str,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = set.next_id;
            set.next_id += 1;
            set.by_key
                .entry(key.to_string())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Subscription::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut set = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entries) = set.by_key.get_mut(&key) {
                entries.retain(|(entry_id, _)| *entry_id != id);
                if entries.is_empty() {
                    set.by_key.remove(&key);
                }
            }
        })
    }

    /// Invokes every callback registered for `key`.
    pub fn notify(&self, key: &str, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            match set.by_key.get(key) {
                Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Whether any callback is registered for `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .contains_key(key)
    }

    /// Number of callbacks registered for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(key)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .clear();
    }
}

impl<T: 'static> Default for KeyedListeners<T> {
    fn default() -> Self {
        Self::new()
    }
}
