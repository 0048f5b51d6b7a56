//! Upstream modification sources.
//!
//! A [`ModificationSource`] is connected by the dictionary when its first
//! subscriber arrives and disconnected when the last one leaves. While
//! connected it feeds modifications into a [`ModificationSink`].

use crate::dictionary::{Command, Stage};
use crate::error::{DictionaryError, Result};
use crate::types::Modification;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// The seam to an upstream producer of modifications.
pub trait ModificationSource<K, V>: Send {
    /// Start feeding `sink`. The returned connection stops the feed.
    fn connect(&mut self, sink: ModificationSink<K, V>) -> Result<Box<dyn Connection>>;
}

/// A live upstream connection.
pub trait Connection: Send {
    /// Stop feeding. Called at most once.
    ///
    /// Modifications pushed before this returns are still applied; the source
    /// must not push through the connection's sink afterwards.
    fn disconnect(self: Box<Self>);
}

/// Where a connected source delivers its modifications.
///
/// Each sink belongs to one connection; once that connection is closed the
/// dictionary ignores anything still sent through it.
pub struct ModificationSink<K, V> {
    epoch: u64,
    stage: Stage,
    commands: Sender<Command<K, V>>,
}

impl<K, V> Clone for ModificationSink<K, V> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            stage: self.stage,
            commands: self.commands.clone(),
        }
    }
}

impl<K, V> ModificationSink<K, V> {
    pub(crate) fn new(epoch: u64, stage: Stage, commands: Sender<Command<K, V>>) -> Self {
        Self {
            epoch,
            stage,
            commands,
        }
    }

    /// The connection this sink belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver a modification. Returns false once the dictionary is gone.
    pub fn push(&self, modification: Modification<K, V>) -> bool {
        self.commands
            .send(Command::Apply {
                epoch: self.epoch,
                stage: self.stage,
                modification,
            })
            .is_ok()
    }

    /// The source has no more modifications.
    pub fn complete(&self) -> bool {
        self.commands
            .send(Command::SourceCompleted {
                epoch: self.epoch,
                stage: self.stage,
            })
            .is_ok()
    }

    /// The source failed. Fatal to the dictionary.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.commands
            .send(Command::SourceFailed {
                epoch: self.epoch,
                stage: self.stage,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// A connection with nothing to stop.
struct Finished;

impl Connection for Finished {
    fn disconnect(self: Box<Self>) {}
}

/// Replays a fixed list of modifications on every connection, then completes.
#[derive(Clone, Debug)]
pub struct IterSource<K, V> {
    modifications: Vec<Modification<K, V>>,
}

impl<K, V> IterSource<K, V> {
    pub fn new(modifications: impl IntoIterator<Item = Modification<K, V>>) -> Self {
        Self {
            modifications: modifications.into_iter().collect(),
        }
    }

    /// A source that completes immediately.
    pub fn empty() -> Self {
        Self {
            modifications: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }
}

impl<K, V> ModificationSource<K, V> for IterSource<K, V>
where
    K: Clone + Send,
    V: Clone + Send,
{
    fn connect(&mut self, sink: ModificationSink<K, V>) -> Result<Box<dyn Connection>> {
        for modification in &self.modifications {
            if !sink.push(modification.clone()) {
                return Ok(Box::new(Finished));
            }
        }
        sink.complete();
        Ok(Box::new(Finished))
    }
}

enum SourceEvent<K, V> {
    Next(Modification<K, V>),
    Failed(String),
}

/// Create an in-process source and the publisher that feeds it.
///
/// Modifications published while the source is disconnected are buffered
/// and delivered on the next connection. Dropping every publisher completes
/// the source.
pub fn channel<K, V>() -> (ModificationPublisher<K, V>, ChannelSource<K, V>) {
    let (sender, receiver) = unbounded();
    (
        ModificationPublisher { sender },
        ChannelSource { receiver },
    )
}

/// Publishing side of [`channel`].
pub struct ModificationPublisher<K, V> {
    sender: Sender<SourceEvent<K, V>>,
}

impl<K, V> Clone for ModificationPublisher<K, V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<K, V> ModificationPublisher<K, V> {
    /// Returns false if the source has been dropped.
    pub fn publish(&self, modification: Modification<K, V>) -> bool {
        self.sender.send(SourceEvent::Next(modification)).is_ok()
    }

    pub fn upsert(&self, key: K, value: V) -> bool {
        self.publish(Modification::upsert(key, value))
    }

    pub fn replace(&self, key: K, value: V) -> bool {
        self.publish(Modification::replace(key, value))
    }

    pub fn remove(&self, key: K) -> bool {
        self.publish(Modification::remove(key))
    }

    pub fn clear(&self) -> bool {
        self.publish(Modification::clear())
    }

    /// Terminate the source with an error.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.sender.send(SourceEvent::Failed(reason.into())).is_ok()
    }
}

/// Receiving side of [`channel`]. Each connection runs a forwarding thread.
pub struct ChannelSource<K, V> {
    receiver: Receiver<SourceEvent<K, V>>,
}

impl<K, V> ModificationSource<K, V> for ChannelSource<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn connect(&mut self, sink: ModificationSink<K, V>) -> Result<Box<dyn Connection>> {
        let (stop, stopped) = bounded::<()>(0);
        let events = self.receiver.clone();
        let epoch = sink.epoch();

        let worker = thread::Builder::new()
            .name(format!("dictionary-source-{}", epoch))
            .spawn(move || forward(events, stopped, sink))
            .map_err(|e| DictionaryError::Upstream(format!("failed to start source: {}", e)))?;

        debug!(epoch, "channel source connected");
        Ok(Box::new(ForwardingConnection {
            stop: Some(stop),
            worker: Some(worker),
        }))
    }
}

/// Pump events into the sink until the publisher side ends or we are stopped.
///
/// A stop request wins over pending events, which stay buffered for the next
/// connection.
fn forward<K, V>(events: Receiver<SourceEvent<K, V>>, stopped: Receiver<()>, sink: ModificationSink<K, V>) {
    loop {
        if let Err(TryRecvError::Disconnected) = stopped.try_recv() {
            break;
        }
        select! {
            recv(stopped) -> _ => break,
            recv(events) -> event => match event {
                Ok(SourceEvent::Next(modification)) => {
                    if !sink.push(modification) {
                        break;
                    }
                }
                Ok(SourceEvent::Failed(reason)) => {
                    sink.fail(reason);
                    break;
                }
                Err(_) => {
                    sink.complete();
                    break;
                }
            },
        }
    }
}

struct ForwardingConnection {
    /// Dropping this wakes the forwarding thread.
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Connection for ForwardingConnection {
    fn disconnect(mut self: Box<Self>) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("channel source forwarding thread panicked");
            }
        }
    }
}
