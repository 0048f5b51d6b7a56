//! Subscriber registry owned by the writer thread.

use crate::error::DictionaryError;
use crate::types::Notification;
use std::collections::HashMap;
use tracing::debug;

use super::types::{Observer, SubscriptionFilter, SubscriptionId};

/// Internal subscription state.
struct Subscriber<K, V> {
    filter: SubscriptionFilter<K>,
    observer: Box<dyn Observer<K, V>>,
}

/// Registry of live subscribers. Its size is the upstream reference count.
pub(crate) struct SubscriptionManager<K, V> {
    subscriptions: HashMap<SubscriptionId, Subscriber<K, V>>,
}

impl<K: PartialEq + Clone, V: Clone> SubscriptionManager<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
        }
    }

    pub(crate) fn insert(
        &mut self,
        id: SubscriptionId,
        filter: SubscriptionFilter<K>,
        observer: Box<dyn Observer<K, V>>,
    ) {
        self.subscriptions.insert(id, Subscriber { filter, observer });
    }

    /// Remove a subscriber without notifying it. Returns false for unknown ids.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Deliver a notification to every matching subscriber.
    ///
    /// Subscribers that refuse delivery are detached. Returns how many were.
    pub(crate) fn broadcast(&mut self, notification: &Notification<K, V>) -> usize {
        let mut to_remove = Vec::new();

        for (id, sub) in self.subscriptions.iter_mut() {
            if sub.filter.matches(notification) && !sub.observer.notify(notification.clone()) {
                to_remove.push(*id);
            }
        }

        for id in &to_remove {
            self.subscriptions.remove(id);
            debug!(subscription = %id, "subscriber detached during delivery");
        }

        to_remove.len()
    }

    /// End every feed normally and empty the registry.
    pub(crate) fn complete_all(&mut self) {
        for (_, mut sub) in self.subscriptions.drain() {
            sub.observer.complete();
        }
    }

    /// End every feed with `error` and empty the registry.
    pub(crate) fn fail_all(&mut self, error: &DictionaryError) {
        for (_, mut sub) in self.subscriptions.drain() {
            sub.observer.fail(error.clone());
        }
    }
}
