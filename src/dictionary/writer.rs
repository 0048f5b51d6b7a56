//! The single writer.
//!
//! One thread owns the state, the subscriber registry and the upstream
//! connection. Subscriptions, cancellations and modifications are all
//! commands on the same queue, so a snapshot can never interleave with a
//! modification and the snapshot-then-live splice needs no lock.

use super::command::{Command, Stage};
use crate::error::DictionaryError;
use crate::signal::InitialisedSignal;
use crate::source::{Connection, ModificationSink, ModificationSource};
use crate::state::StateStore;
use crate::subscriptions::{Observer, SubscriptionFilter, SubscriptionId, SubscriptionManager};
use crate::types::{DictionaryKey, DictionaryValue, Modification, Notification};
use crossbeam_channel::{Receiver, Sender};
use std::mem;
use tracing::{debug, error, info, info_span, trace};

/// Upstream connection state. Initial always precedes Live.
enum Upstream {
    Idle,
    Initial {
        epoch: u64,
        connection: Box<dyn Connection>,
    },
    Live {
        epoch: u64,
        connection: Box<dyn Connection>,
    },
}

impl Upstream {
    fn epoch(&self) -> Option<u64> {
        match self {
            Upstream::Idle => None,
            Upstream::Initial { epoch, .. } | Upstream::Live { epoch, .. } => Some(*epoch),
        }
    }

    fn is_connected(&self) -> bool {
        !matches!(self, Upstream::Idle)
    }
}

/// How the dictionary ended, if it has.
enum Terminal {
    Completed,
    Failed(DictionaryError),
}

pub(crate) struct Writer<K, V> {
    name: String,
    state: StateStore<K, V>,
    subscriptions: SubscriptionManager<K, V>,
    initial: Option<Box<dyn ModificationSource<K, V>>>,
    live: Box<dyn ModificationSource<K, V>>,
    upstream: Upstream,
    last_epoch: u64,
    terminal: Option<Terminal>,
    /// Handed to sources inside each connection's sink.
    commands: Sender<Command<K, V>>,
    queue: Receiver<Command<K, V>>,
    initialised: InitialisedSignal,
}

impl<K: DictionaryKey, V: DictionaryValue> Writer<K, V> {
    pub(crate) fn new(
        name: String,
        state: StateStore<K, V>,
        initial: Option<Box<dyn ModificationSource<K, V>>>,
        live: Box<dyn ModificationSource<K, V>>,
        commands: Sender<Command<K, V>>,
        queue: Receiver<Command<K, V>>,
        initialised: InitialisedSignal,
    ) -> Self {
        Self {
            name,
            state,
            subscriptions: SubscriptionManager::new(),
            initial,
            live,
            upstream: Upstream::Idle,
            last_epoch: 0,
            terminal: None,
            commands,
            queue,
            initialised,
        }
    }

    pub(crate) fn run(mut self) {
        let span = info_span!("dictionary", name = %self.name);
        let _enter = span.enter();
        debug!("writer started");

        while let Ok(command) = self.queue.recv() {
            match command {
                Command::Subscribe {
                    id,
                    filter,
                    observer,
                } => self.subscribe(id, filter, observer),
                Command::Unsubscribe { id } => self.unsubscribe(id),
                Command::Apply {
                    epoch,
                    stage,
                    modification,
                } => self.apply(epoch, stage, modification),
                Command::SourceCompleted { epoch, stage } => self.source_completed(epoch, stage),
                Command::SourceFailed {
                    epoch,
                    stage,
                    reason,
                } => self.source_failed(epoch, stage, reason),
                Command::Dispose => break,
            }
            self.sync_connection();
        }

        self.dispose();
        debug!("writer stopped");
    }

    // --- Subscribers ---

    fn subscribe(
        &mut self,
        id: SubscriptionId,
        filter: SubscriptionFilter<K>,
        mut observer: Box<dyn Observer<K, V>>,
    ) {
        if let Some(Terminal::Failed(error)) = &self.terminal {
            debug!(subscription = %id, "rejecting subscriber, dictionary has failed");
            observer.fail(error.clone());
            return;
        }

        let completed = matches!(self.terminal, Some(Terminal::Completed));
        let replayed = match &filter {
            SubscriptionFilter::All => {
                // Before the current connection has initialised, the subscriber
                // gets the engine's own Initialised later instead of one here.
                let loaded = completed || matches!(self.upstream, Upstream::Live { .. });
                replay_snapshot(&self.state, observer.as_mut(), loaded)
            }
            SubscriptionFilter::Key(key) => observer.notify(self.state.lookup(key)),
        };

        if !replayed {
            debug!(subscription = %id, "subscriber detached during snapshot");
            return;
        }

        if completed {
            observer.complete();
            return;
        }

        self.subscriptions.insert(id, filter, observer);
        debug!(
            subscription = %id,
            subscribers = self.subscriptions.len(),
            "subscriber attached"
        );
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if self.subscriptions.remove(id) {
            debug!(
                subscription = %id,
                subscribers = self.subscriptions.len(),
                "subscriber cancelled"
            );
        }
    }

    // --- Modifications ---

    /// Whether a command from a connection still takes effect.
    ///
    /// Initial-stream commands count only for the current connection, since
    /// the stream is replayed on the next one. Live commands were consumed from
    /// the source before its connection closed and are applied in queue order.
    fn accepts(&self, epoch: u64, stage: Stage) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        stage == Stage::Live || self.upstream.epoch() == Some(epoch)
    }

    fn apply(&mut self, epoch: u64, stage: Stage, modification: Modification<K, V>) {
        if !self.accepts(epoch, stage) {
            trace!(epoch, "ignoring modification from a closed connection");
            return;
        }

        trace!(
            epoch,
            modification = modification.name(),
            key = ?modification.key(),
            "applying modification"
        );

        match self.state.apply(modification) {
            Ok(notifications) => {
                for notification in &notifications {
                    self.subscriptions.broadcast(notification);
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn source_completed(&mut self, epoch: u64, stage: Stage) {
        if !self.accepts(epoch, stage) {
            trace!(epoch, "ignoring completion from a closed connection");
            return;
        }

        if stage == Stage::Initial {
            debug!(epoch, entries = self.state.len(), "initial stream exhausted");
            self.disconnect();
            self.connect_live();
        } else {
            info!(epoch, "upstream completed");
            self.disconnect();
            self.terminal = Some(Terminal::Completed);
            self.subscriptions.complete_all();
        }
    }

    fn source_failed(&mut self, epoch: u64, stage: Stage, reason: String) {
        if !self.accepts(epoch, stage) {
            trace!(epoch, "ignoring failure from a closed connection");
            return;
        }
        self.fail(DictionaryError::Upstream(reason));
    }

    /// Fatal: broadcast, cache and stop consuming.
    fn fail(&mut self, error: DictionaryError) {
        error!(%error, subscribers = self.subscriptions.len(), "dictionary failed");
        self.terminal = Some(Terminal::Failed(error.clone()));
        self.disconnect();
        self.subscriptions.fail_all(&error);
        self.initialised.resolve(Err(error));
    }

    fn emit_initialised(&mut self) {
        if self.initialised.resolve(Ok(())) {
            info!(entries = self.state.len(), "dictionary initialised");
        }
        self.subscriptions.broadcast(&Notification::Initialised);
    }

    // --- Upstream connection ---

    /// Connect on the first subscriber, disconnect after the last.
    fn sync_connection(&mut self) {
        loop {
            if self.terminal.is_some() {
                return;
            }

            let wanted = !self.subscriptions.is_empty();
            let connected = self.upstream.is_connected();

            if wanted && !connected {
                debug!(subscribers = self.subscriptions.len(), "connecting upstream");
                self.connect();
            } else if !wanted && connected {
                debug!("no subscribers left, disconnecting upstream");
                self.disconnect();
                return;
            } else {
                return;
            }
        }
    }

    fn connect(&mut self) {
        if self.initial.is_none() {
            self.connect_live();
            return;
        }

        let epoch = self.next_epoch();
        let sink = ModificationSink::new(epoch, Stage::Initial, self.commands.clone());
        let result = match self.initial.as_mut() {
            Some(initial) => initial.connect(sink),
            None => return,
        };

        match result {
            Ok(connection) => {
                debug!(epoch, "initial stream connected");
                self.upstream = Upstream::Initial { epoch, connection };
            }
            Err(error) => self.fail(as_upstream(error)),
        }
    }

    /// Anything the live stream sends is queued behind the `Initialised`
    /// broadcast here, since this thread drains the queue.
    fn connect_live(&mut self) {
        let epoch = self.next_epoch();
        let sink = ModificationSink::new(epoch, Stage::Live, self.commands.clone());
        match self.live.connect(sink) {
            Ok(connection) => {
                debug!(epoch, "live stream connected");
                self.upstream = Upstream::Live { epoch, connection };
                self.emit_initialised();
            }
            Err(error) => self.fail(as_upstream(error)),
        }
    }

    fn disconnect(&mut self) {
        match mem::replace(&mut self.upstream, Upstream::Idle) {
            Upstream::Idle => {}
            Upstream::Initial { epoch, connection } | Upstream::Live { epoch, connection } => {
                connection.disconnect();
                debug!(epoch, "upstream disconnected");
            }
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.last_epoch += 1;
        self.last_epoch
    }

    // --- Shutdown ---

    fn dispose(&mut self) {
        let error = DictionaryError::Disposed;
        self.disconnect();
        self.subscriptions.fail_all(&error);
        self.initialised.resolve(Err(error.clone()));
        self.terminal = Some(Terminal::Failed(error.clone()));

        // Subscriptions queued behind the dispose request never get a snapshot.
        for command in self.queue.try_iter() {
            if let Command::Subscribe { mut observer, .. } = command {
                observer.fail(error.clone());
            }
        }
        info!("dictionary disposed");
    }
}

/// Replay `Existing` for every entry, then `Initialised` if the view is loaded.
fn replay_snapshot<K: DictionaryKey, V: DictionaryValue>(
    state: &StateStore<K, V>,
    observer: &mut dyn Observer<K, V>,
    loaded: bool,
) -> bool {
    for notification in state.snapshot() {
        if !observer.notify(notification) {
            return false;
        }
    }
    !loaded || observer.notify(Notification::Initialised)
}

fn as_upstream(error: DictionaryError) -> DictionaryError {
    match error {
        DictionaryError::Upstream(_) => error,
        other => DictionaryError::Upstream(other.to_string()),
    }
}
