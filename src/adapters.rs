//! Observer adapters: stateless projections over a subscription's feed.

use crate::error::DictionaryError;
use crate::subscriptions::Observer;
use crate::types::{KindSet, Notification, NotificationKind};
use std::fmt::Debug;

/// Forwards only notifications whose kind is in the set.
pub struct Only<O> {
    kinds: KindSet,
    inner: O,
}

impl<O> Only<O> {
    pub fn new(kinds: impl Into<KindSet>, inner: O) -> Self {
        Self {
            kinds: kinds.into(),
            inner,
        }
    }
}

impl<K, V, O: Observer<K, V>> Observer<K, V> for Only<O> {
    fn notify(&mut self, notification: Notification<K, V>) -> bool {
        if self.kinds.contains(notification.kind()) {
            self.inner.notify(notification)
        } else {
            true
        }
    }

    fn complete(&mut self) {
        self.inner.complete()
    }

    fn fail(&mut self, error: DictionaryError) {
        self.inner.fail(error)
    }
}

/// Turns `Missing` into a `KeyNotFound` error and detaches.
pub struct ThrowOnMissing<O> {
    inner: O,
}

impl<O> ThrowOnMissing<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

impl<K: Debug, V, O: Observer<K, V>> Observer<K, V> for ThrowOnMissing<O> {
    fn notify(&mut self, notification: Notification<K, V>) -> bool {
        match notification {
            Notification::Missing { key } => {
                self.inner
                    .fail(DictionaryError::KeyNotFound(format!("{:?}", key)));
                false
            }
            other => self.inner.notify(other),
        }
    }

    fn complete(&mut self) {
        self.inner.complete()
    }

    fn fail(&mut self, error: DictionaryError) {
        self.inner.fail(error)
    }
}

/// Completes, without forwarding it, on the first notification of the given kinds.
pub struct CompleteOn<O> {
    kinds: KindSet,
    inner: O,
}

impl<O> CompleteOn<O> {
    pub fn new(kinds: impl Into<KindSet>, inner: O) -> Self {
        Self {
            kinds: kinds.into(),
            inner,
        }
    }
}

impl<K, V, O: Observer<K, V>> Observer<K, V> for CompleteOn<O> {
    fn notify(&mut self, notification: Notification<K, V>) -> bool {
        if self.kinds.contains(notification.kind()) {
            self.inner.complete();
            return false;
        }
        self.inner.notify(notification)
    }

    fn complete(&mut self) {
        self.inner.complete()
    }

    fn fail(&mut self, error: DictionaryError) {
        self.inner.fail(error)
    }
}

/// Adapter constructors for any observer.
pub trait ObserverExt<K, V>: Observer<K, V> + Sized {
    fn only(self, kinds: impl Into<KindSet>) -> Only<Self> {
        Only::new(kinds, self)
    }

    fn throw_on_missing(self) -> ThrowOnMissing<Self> {
        ThrowOnMissing::new(self)
    }

    fn complete_on(self, kinds: impl Into<KindSet>) -> CompleteOn<Self> {
        CompleteOn::new(kinds, self)
    }

    fn complete_on_removed(self) -> CompleteOn<Self> {
        self.complete_on(NotificationKind::Removed)
    }

    /// Completes on a per-key clear or a full clear.
    fn complete_on_cleared(self) -> CompleteOn<Self> {
        self.complete_on(NotificationKind::KeyCleared | NotificationKind::DictionaryCleared)
    }
}

impl<K, V, O: Observer<K, V>> ObserverExt<K, V> for O {}
