//! The observable dictionary handle.

mod command;
mod writer;

pub(crate) use command::{Command, Stage};

use self::writer::Writer;
use crate::error::{DictionaryError, Result};
use crate::merge::{MergeFault, MergeFn, MergePolicy, ReplaceExisting};
use crate::signal::InitialisedSignal;
use crate::source::ModificationSource;
use crate::state::StateStore;
use crate::subscriptions::{
    FeedEvent, Observer, Subscription, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
use crate::types::{DictionaryKey, DictionaryValue, Notification};
use crossbeam_channel::{bounded, unbounded, Receiver, SendError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Dictionary configuration.
#[derive(Clone, Debug)]
pub struct DictionaryConfig {
    /// Name of the writer thread, attached to every log event.
    pub name: String,

    /// Notifications buffered by channels created by `subscribe_channel` and
    /// `get_channel`. A subscriber whose buffer fills up is detached. One extra
    /// slot is kept for the terminal `Completed`/`Failed` event.
    /// Default: None (unbounded)
    pub subscriber_buffer: Option<usize>,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            name: "dictionary".to_string(),
            subscriber_buffer: None,
        }
    }
}

/// Assembles an [`ObservableDictionary`].
pub struct DictionaryBuilder<K, V> {
    config: DictionaryConfig,
    initial: Option<Box<dyn ModificationSource<K, V>>>,
    live: Box<dyn ModificationSource<K, V>>,
    policy: Box<dyn MergePolicy<K, V>>,
}

impl<K: DictionaryKey, V: DictionaryValue> DictionaryBuilder<K, V> {
    pub fn new<S: ModificationSource<K, V> + 'static>(live: S) -> Self {
        Self {
            config: DictionaryConfig::default(),
            initial: None,
            live: Box::new(live),
            policy: Box::new(ReplaceExisting),
        }
    }

    /// A stream applied before the live one on every connection. The
    /// dictionary reports `Initialised` once it is exhausted.
    pub fn initial<S: ModificationSource<K, V> + 'static>(mut self, initial: S) -> Self {
        self.initial = Some(Box::new(initial));
        self
    }

    pub fn merge_policy<P: MergePolicy<K, V>>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Use a closure as the merge policy.
    pub fn merge_with<F>(self, merge: F) -> Self
    where
        F: Fn(&K, &V, &V) -> std::result::Result<V, MergeFault> + Send + 'static,
    {
        self.merge_policy(MergeFn(merge))
    }

    pub fn config(mut self, config: DictionaryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn subscriber_buffer(mut self, capacity: usize) -> Self {
        self.config.subscriber_buffer = Some(capacity);
        self
    }

    /// Start the writer thread. Nothing is consumed until the first subscriber.
    pub fn build(self) -> Result<ObservableDictionary<K, V>> {
        let DictionaryBuilder {
            config,
            initial,
            live,
            policy,
        } = self;

        let (commands, queue) = unbounded();
        let initialised = InitialisedSignal::new();
        let writer = Writer::new(
            config.name.clone(),
            StateStore::with_boxed_policy(policy),
            initial,
            live,
            commands.clone(),
            queue,
            initialised.clone(),
        );

        let worker = thread::Builder::new()
            .name(format!("dictionary-{}", config.name))
            .spawn(move || writer.run())?;

        info!(dictionary = %config.name, "dictionary started");

        Ok(ObservableDictionary {
            name: config.name,
            subscriber_buffer: config.subscriber_buffer,
            commands,
            next_id: AtomicU64::new(1),
            disposed: RwLock::new(false),
            initialised,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// A live key-value view over a modification stream.
///
/// Every subscriber first receives a consistent snapshot of the current
/// state, then every later change. The upstream source is connected while at
/// least one subscriber is attached. Dropping the dictionary disposes it.
pub struct ObservableDictionary<K, V> {
    name: String,
    subscriber_buffer: Option<usize>,
    commands: Sender<Command<K, V>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Held shared while a subscribe is enqueued, exclusively while disposing,
    /// so no subscribe can land behind the dispose request.
    disposed: RwLock<bool>,
    initialised: InitialisedSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: DictionaryKey, V: DictionaryValue> ObservableDictionary<K, V> {
    /// A dictionary over `live` with the default merge policy and config.
    pub fn new<S: ModificationSource<K, V> + 'static>(live: S) -> Result<Self> {
        DictionaryBuilder::new(live).build()
    }

    pub fn builder<S: ModificationSource<K, V> + 'static>(live: S) -> DictionaryBuilder<K, V> {
        DictionaryBuilder::new(live)
    }

    /// Subscribe to the full feed: snapshot, `Initialised`, then live changes.
    pub fn subscribe<O: Observer<K, V> + 'static>(&self, observer: O) -> Subscription<K, V> {
        self.attach(SubscriptionFilter::All, Box::new(observer))
    }

    /// Subscribe to the full feed through a channel.
    pub fn subscribe_channel(&self) -> SubscriptionHandle<K, V> {
        let (sender, receiver) = self.feed_channel();
        SubscriptionHandle {
            subscription: self.subscribe(sender),
            receiver,
        }
    }

    /// Subscribe to one key: `Existing` or `Missing`, then changes to that key
    /// and every `DictionaryCleared`.
    pub fn get<O: Observer<K, V> + 'static>(&self, key: K, observer: O) -> Subscription<K, V> {
        self.attach(SubscriptionFilter::Key(key), Box::new(observer))
    }

    /// Subscribe to one key through a channel.
    pub fn get_channel(&self, key: K) -> SubscriptionHandle<K, V> {
        let (sender, receiver) = self.feed_channel();
        SubscriptionHandle {
            subscription: self.get(key, sender),
            receiver,
        }
    }

    /// Block until the dictionary is loaded and return its content.
    pub fn items(&self) -> Result<HashMap<K, V>> {
        // Unbounded so a large snapshot cannot overflow it.
        let (sender, receiver) = unbounded();
        let subscription = self.subscribe(sender);
        let mut items = HashMap::new();

        loop {
            let event = receiver.recv().map_err(|_| DictionaryError::Disposed)?;
            match event {
                FeedEvent::Next(Notification::Initialised) | FeedEvent::Completed => break,
                FeedEvent::Next(notification) => fold_notification(&mut items, notification),
                FeedEvent::Failed(error) => return Err(error),
            }
        }

        subscription.cancel();
        Ok(items)
    }

    fn attach(
        &self,
        filter: SubscriptionFilter<K>,
        observer: Box<dyn Observer<K, V>>,
    ) -> Subscription<K, V> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let rejected = {
            let disposed = self.disposed.read();
            if *disposed {
                Some(observer)
            } else {
                match self.commands.send(Command::Subscribe {
                    id,
                    filter,
                    observer,
                }) {
                    Ok(()) => return Subscription::new(id, self.commands.clone()),
                    Err(SendError(Command::Subscribe { observer, .. })) => Some(observer),
                    Err(_) => None,
                }
            }
        };

        // Failed outside the lock: the observer may call back into the dictionary.
        if let Some(mut observer) = rejected {
            debug!(dictionary = %self.name, subscription = %id, "subscribe after dispose");
            observer.fail(DictionaryError::Disposed);
        }
        Subscription::detached(id)
    }

    fn feed_channel(&self) -> (Sender<FeedEvent<K, V>>, Receiver<FeedEvent<K, V>>) {
        match self.subscriber_buffer {
            Some(capacity) => bounded(capacity + 1),
            None => unbounded(),
        }
    }
}

impl<K, V> ObservableDictionary<K, V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-shot signal for the first successful initialisation.
    pub fn is_initialised(&self) -> InitialisedSignal {
        self.initialised.clone()
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.read()
    }

    /// Stop the dictionary. Every subscriber, current and future, receives
    /// `DictionaryError::Disposed`.
    pub fn dispose(&self) {
        {
            let mut disposed = self.disposed.write();
            if *disposed {
                return;
            }
            *disposed = true;
            let _ = self.commands.send(Command::Dispose);
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // When disposed from inside an observer we are the writer; just detach.
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(dictionary = %self.name, "writer thread panicked");
            }
        }
    }
}

impl<K, V> Drop for ObservableDictionary<K, V> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn fold_notification<K: DictionaryKey, V>(items: &mut HashMap<K, V>, notification: Notification<K, V>) {
    match notification {
        Notification::Existing { key, value }
        | Notification::Inserted { key, value }
        | Notification::Updated { key, value, .. }
        | Notification::Replaced { key, value, .. } => {
            items.insert(key, value);
        }
        Notification::Removed { key, .. } | Notification::KeyCleared { key, .. } => {
            items.remove(&key);
        }
        Notification::Initialised | Notification::Missing { .. } | Notification::DictionaryCleared => {}
    }
}
