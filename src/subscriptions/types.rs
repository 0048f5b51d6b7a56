//! Subscription types: observers, feed events, and cancellation handles.

use crate::dictionary::Command;
use crate::error::DictionaryError;
use crate::types::{Notification, NotificationKind};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives a subscription's feed.
///
/// Called on the dictionary's writer thread, so implementations should not
/// block. After `complete` or `fail` no further calls are made.
pub trait Observer<K, V>: Send {
    /// Deliver one notification. Returning `false` detaches the observer.
    fn notify(&mut self, notification: Notification<K, V>) -> bool;

    /// The feed ended normally.
    fn complete(&mut self);

    /// The feed ended with an error.
    fn fail(&mut self, error: DictionaryError);
}

impl<K, V, O> Observer<K, V> for Box<O>
where
    O: Observer<K, V> + ?Sized,
{
    fn notify(&mut self, notification: Notification<K, V>) -> bool {
        (**self).notify(notification)
    }

    fn complete(&mut self) {
        (**self).complete()
    }

    fn fail(&mut self, error: DictionaryError) {
        (**self).fail(error)
    }
}

/// One item of a channel-backed feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent<K, V> {
    Next(Notification<K, V>),
    Completed,
    Failed(DictionaryError),
}

impl<K, V> FeedEvent<K, V> {
    pub fn notification(&self) -> Option<&Notification<K, V>> {
        match self {
            FeedEvent::Next(notification) => Some(notification),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FeedEvent::Next(_))
    }
}

/// Channel senders are observers. A full or disconnected channel detaches.
///
/// On a bounded channel the last slot is kept for the terminal event, so a
/// subscriber that stopped reading still learns how its feed ended.
impl<K: Send, V: Send> Observer<K, V> for Sender<FeedEvent<K, V>> {
    fn notify(&mut self, notification: Notification<K, V>) -> bool {
        if let Some(capacity) = self.capacity() {
            if self.len() + 1 >= capacity {
                return false;
            }
        }
        self.try_send(FeedEvent::Next(notification)).is_ok()
    }

    fn complete(&mut self) {
        let _ = self.try_send(FeedEvent::Completed);
    }

    fn fail(&mut self, error: DictionaryError) {
        let _ = self.try_send(FeedEvent::Failed(error));
    }
}

/// Which live notifications a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionFilter<K> {
    /// The whole feed.
    All,
    /// Notifications about one key, plus `DictionaryCleared`.
    Key(K),
}

impl<K: PartialEq> SubscriptionFilter<K> {
    pub fn matches<V>(&self, notification: &Notification<K, V>) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Key(key) => {
                notification.kind() == NotificationKind::DictionaryCleared
                    || notification.key() == Some(key)
            }
        }
    }
}

/// Cancellation handle for a subscription.
///
/// Dropping the handle cancels the subscription. Cancelling releases the
/// subscriber's reference on the upstream connection.
pub struct Subscription<K, V> {
    id: SubscriptionId,
    commands: Option<Sender<Command<K, V>>>,
}

impl<K, V> Subscription<K, V> {
    pub(crate) fn new(id: SubscriptionId, commands: Sender<Command<K, V>>) -> Self {
        Self {
            id,
            commands: Some(commands),
        }
    }

    /// A handle for a subscription that was rejected before registration.
    pub(crate) fn detached(id: SubscriptionId) -> Self {
        Self { id, commands: None }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Detach the subscriber. Other subscribers are unaffected.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            // The writer may already be gone; nothing is left to detach then.
            let _ = commands.send(Command::Unsubscribe { id: self.id });
        }
    }
}

impl<K, V> Drop for Subscription<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, V> fmt::Debug for Subscription<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.commands.is_some())
            .finish()
    }
}

/// A subscription whose feed arrives on a channel.
pub struct SubscriptionHandle<K, V> {
    pub subscription: Subscription<K, V>,
    /// Channel to receive events.
    pub receiver: Receiver<FeedEvent<K, V>>,
}

impl<K, V> SubscriptionHandle<K, V> {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent<K, V>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent<K, V>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeedEvent<K, V>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn cancel(self) {
        self.subscription.cancel();
    }
}
