//! Integration tests for the observable dictionary.

use observable_dictionary::{
    source, Connection, DictionaryConfig, FeedEvent, IterSource, Modification,
    ModificationPublisher, ModificationSink, ModificationSource, Notification, NotificationKind,
    ObservableDictionary, ObserverExt, Result, SubscriptionHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(50);

type Dictionary = ObservableDictionary<String, i64>;
type Handle = SubscriptionHandle<String, i64>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn live_dictionary() -> (ModificationPublisher<String, i64>, Dictionary) {
    init_tracing();
    let (publisher, source) = source::channel();
    let dictionary = ObservableDictionary::builder(source)
        .name("integration")
        .build()
        .unwrap();
    (publisher, dictionary)
}

fn summing_dictionary() -> (ModificationPublisher<String, i64>, Dictionary) {
    init_tracing();
    let (publisher, source) = source::channel();
    let dictionary = ObservableDictionary::builder(source)
        .merge_with(|_key, existing, incoming| Ok(existing + incoming))
        .build()
        .unwrap();
    (publisher, dictionary)
}

fn next(handle: &Handle) -> Notification<String, i64> {
    match handle.recv_timeout(TIMEOUT) {
        Ok(FeedEvent::Next(notification)) => notification,
        other => panic!("Expected a notification, got {:?}", other),
    }
}

/// Drain the snapshot up to and including `Initialised`.
fn snapshot(handle: &Handle) -> HashMap<String, i64> {
    let mut entries = HashMap::new();
    loop {
        match next(handle) {
            Notification::Existing { key, value } => {
                assert!(entries.insert(key, value).is_none(), "Key replayed twice");
            }
            Notification::Initialised => return entries,
            other => panic!("Unexpected notification in snapshot: {:?}", other),
        }
    }
}

fn assert_quiet(handle: &Handle) {
    let result = handle.recv_timeout(QUIET);
    assert!(result.is_err(), "Expected no event, got {:?}", result);
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn key(name: &str) -> String {
    name.to_string()
}

// --- Snapshot-then-live ---

#[test]
fn test_live_notifications_after_snapshot() {
    let (publisher, dictionary) = summing_dictionary();
    let handle = dictionary.subscribe_channel();
    assert!(snapshot(&handle).is_empty());

    publisher.upsert(key("A"), 1);
    publisher.upsert(key("A"), 2);

    assert_eq!(next(&handle), Notification::Inserted { key: key("A"), value: 1 });
    assert_eq!(
        next(&handle),
        Notification::Updated {
            key: key("A"),
            value: 3,
            updating_value: 2,
            previous_value: 1,
        }
    );
    assert_eq!(dictionary.items().unwrap(), HashMap::from([(key("A"), 3)]));
}

#[test]
fn test_late_subscriber_gets_existing_state() {
    let (publisher, dictionary) = live_dictionary();
    let first = dictionary.subscribe_channel();
    snapshot(&first);

    publisher.upsert(key("A"), 1);
    publisher.upsert(key("B"), 2);
    publisher.remove(key("A"));
    assert_eq!(next(&first).kind(), NotificationKind::Inserted);
    assert_eq!(next(&first).kind(), NotificationKind::Inserted);
    assert_eq!(next(&first).kind(), NotificationKind::Removed);

    let late = dictionary.subscribe_channel();
    assert_eq!(snapshot(&late), HashMap::from([(key("B"), 2)]));

    publisher.replace(key("B"), 20);
    let expected = Notification::Replaced {
        key: key("B"),
        value: 20,
        previous_value: 2,
    };
    assert_eq!(next(&late), expected);
    assert_eq!(next(&first), expected);
}

#[test]
fn test_remove_missing_key_is_silent() {
    let (publisher, dictionary) = live_dictionary();
    let handle = dictionary.subscribe_channel();
    snapshot(&handle);

    publisher.upsert(key("A"), 1);
    publisher.remove(key("A"));
    publisher.remove(key("A"));

    assert_eq!(next(&handle), Notification::Inserted { key: key("A"), value: 1 });
    assert_eq!(
        next(&handle),
        Notification::Removed {
            key: key("A"),
            previous_value: 1,
        }
    );
    assert_quiet(&handle);
}

#[test]
fn test_replace_missing_key_inserts() {
    let (publisher, dictionary) = live_dictionary();
    let handle = dictionary.subscribe_channel();
    snapshot(&handle);

    publisher.replace(key("A"), 4);

    assert_eq!(next(&handle), Notification::Inserted { key: key("A"), value: 4 });
}

#[test]
fn test_clear_emits_every_key_then_dictionary_cleared() {
    let (publisher, dictionary) = live_dictionary();
    let handle = dictionary.subscribe_channel();
    snapshot(&handle);

    publisher.upsert(key("A"), 1);
    publisher.upsert(key("B"), 2);
    publisher.clear();
    next(&handle);
    next(&handle);

    let mut cleared = vec![next(&handle), next(&handle)];
    cleared.sort_by(|a, b| a.key().cmp(&b.key()));
    assert_eq!(
        cleared,
        vec![
            Notification::KeyCleared {
                key: key("A"),
                previous_value: 1,
            },
            Notification::KeyCleared {
                key: key("B"),
                previous_value: 2,
            },
        ]
    );
    assert_eq!(next(&handle), Notification::DictionaryCleared);
    assert!(dictionary.items().unwrap().is_empty());
}

// --- Initial stream ---

#[test]
fn test_initial_stream_then_single_initialised() {
    init_tracing();
    let (publisher, live) = source::channel();
    let dictionary: Dictionary = ObservableDictionary::builder(live)
        .initial(IterSource::new(vec![
            Modification::upsert(key("A"), 1),
            Modification::upsert(key("B"), 2),
        ]))
        .build()
        .unwrap();

    let early = dictionary.subscribe_channel();
    assert_eq!(next(&early).kind(), NotificationKind::Inserted);
    assert_eq!(next(&early).kind(), NotificationKind::Inserted);
    assert_eq!(next(&early), Notification::Initialised);

    publisher.upsert(key("C"), 3);
    assert_eq!(next(&early), Notification::Inserted { key: key("C"), value: 3 });

    let late = dictionary.subscribe_channel();
    assert_eq!(
        snapshot(&late),
        HashMap::from([(key("A"), 1), (key("B"), 2), (key("C"), 3)])
    );

    assert_quiet(&early);
    assert_quiet(&late);
}

#[test]
fn test_is_initialised_signal() {
    init_tracing();
    let (_publisher, live) = source::channel();
    let dictionary: Dictionary = ObservableDictionary::builder(live)
        .initial(IterSource::new(vec![Modification::upsert(key("A"), 1)]))
        .build()
        .unwrap();

    let signal = dictionary.is_initialised();
    // Nothing is connected until someone subscribes.
    assert_eq!(signal.wait_timeout(QUIET), None);

    let _handle = dictionary.subscribe_channel();
    assert_eq!(signal.wait_timeout(TIMEOUT), Some(Ok(())));
    // Replays to late observers.
    assert_eq!(dictionary.is_initialised().wait(), Ok(()));
}

#[test]
fn test_items_folds_initial_stream() {
    init_tracing();
    let dictionary: Dictionary = ObservableDictionary::builder(IterSource::empty())
        .initial(IterSource::new(vec![
            Modification::upsert(key("A"), 1),
            Modification::upsert(key("B"), 2),
            Modification::remove(key("A")),
        ]))
        .build()
        .unwrap();

    assert_eq!(dictionary.items().unwrap(), HashMap::from([(key("B"), 2)]));
}

// --- Completion ---

#[test]
fn test_upstream_completion_ends_feeds() {
    let (publisher, dictionary) = live_dictionary();
    let handle = dictionary.subscribe_channel();
    snapshot(&handle);

    publisher.upsert(key("A"), 1);
    drop(publisher);

    assert_eq!(next(&handle), Notification::Inserted { key: key("A"), value: 1 });
    assert_eq!(handle.recv_timeout(TIMEOUT).unwrap(), FeedEvent::Completed);

    let late = dictionary.subscribe_channel();
    assert_eq!(snapshot(&late), HashMap::from([(key("A"), 1)]));
    assert_eq!(late.recv_timeout(TIMEOUT).unwrap(), FeedEvent::Completed);
}

// --- Keyed view ---

#[test]
fn test_get_missing_then_inserted() {
    let (publisher, dictionary) = live_dictionary();
    let handle = dictionary.get_channel(key("X"));

    assert_eq!(next(&handle), Notification::Missing { key: key("X") });

    publisher.upsert(key("Y"), 1);
    publisher.upsert(key("X"), 9);

    assert_eq!(next(&handle), Notification::Inserted { key: key("X"), value: 9 });
    assert_quiet(&handle);
}

#[test]
fn test_get_existing_and_updates() {
    let (publisher, dictionary) = summing_dictionary();
    let anchor = dictionary.subscribe_channel();
    snapshot(&anchor);
    publisher.upsert(key("A"), 5);
    next(&anchor);

    let handle = dictionary.get_channel(key("A"));
    assert_eq!(next(&handle), Notification::Existing { key: key("A"), value: 5 });

    publisher.upsert(key("A"), 1);
    publisher.remove(key("A"));
    assert_eq!(next(&handle).value(), Some(&6));
    assert_eq!(
        next(&handle),
        Notification::Removed {
            key: key("A"),
            previous_value: 6,
        }
    );
}

#[test]
fn test_get_sees_dictionary_cleared() {
    let (publisher, dictionary) = live_dictionary();
    let empty_key = dictionary.get_channel(key("Z"));
    let present_key = dictionary.get_channel(key("A"));
    assert_eq!(next(&empty_key), Notification::Missing { key: key("Z") });
    assert_eq!(next(&present_key), Notification::Missing { key: key("A") });

    publisher.upsert(key("A"), 1);
    publisher.clear();

    assert_eq!(next(&present_key).kind(), NotificationKind::Inserted);
    assert_eq!(next(&present_key).kind(), NotificationKind::KeyCleared);
    assert_eq!(next(&present_key), Notification::DictionaryCleared);
    assert_eq!(next(&empty_key), Notification::DictionaryCleared);
    assert_quiet(&empty_key);
}

#[test]
fn test_keyed_view_complete_on_removed() {
    let (publisher, dictionary) = live_dictionary();
    let (sender, receiver) = crossbeam_channel::unbounded::<FeedEvent<String, i64>>();
    let _subscription = dictionary.get(key("A"), sender.complete_on_removed());

    publisher.upsert(key("A"), 1);
    publisher.remove(key("A"));
    publisher.upsert(key("A"), 2);

    let events: Vec<_> = (0..3)
        .map(|_| receiver.recv_timeout(TIMEOUT).unwrap())
        .collect();
    assert_eq!(
        events,
        vec![
            FeedEvent::Next(Notification::Missing { key: key("A") }),
            FeedEvent::Next(Notification::Inserted { key: key("A"), value: 1 }),
            FeedEvent::Completed,
        ]
    );
    assert!(receiver.recv_timeout(QUIET).is_err());
}

// --- Reference-counted connection ---

/// Wraps a channel source and counts connects and disconnects.
struct CountingSource {
    inner: source::ChannelSource<String, i64>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

struct CountingConnection {
    inner: Box<dyn Connection>,
    disconnects: Arc<AtomicUsize>,
}

impl Connection for CountingConnection {
    fn disconnect(self: Box<Self>) {
        self.inner.disconnect();
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl ModificationSource<String, i64> for CountingSource {
    fn connect(&mut self, sink: ModificationSink<String, i64>) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.connect(sink)?;
        Ok(Box::new(CountingConnection {
            inner,
            disconnects: Arc::clone(&self.disconnects),
        }))
    }
}

#[test]
fn test_connection_is_reference_counted() {
    init_tracing();
    let (publisher, inner) = source::channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let dictionary: Dictionary = ObservableDictionary::new(CountingSource {
        inner,
        connects: Arc::clone(&connects),
        disconnects: Arc::clone(&disconnects),
    })
    .unwrap();

    // Lazy: no subscriber, no connection.
    thread::sleep(QUIET);
    assert_eq!(connects.load(Ordering::SeqCst), 0);

    let first = dictionary.subscribe_channel();
    let second = dictionary.get_channel(key("A"));
    snapshot(&first);
    next(&second);
    wait_until(|| connects.load(Ordering::SeqCst) == 1);

    publisher.upsert(key("A"), 1);
    assert_eq!(next(&first).kind(), NotificationKind::Inserted);
    assert_eq!(next(&second).kind(), NotificationKind::Inserted);

    first.cancel();
    thread::sleep(QUIET);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);

    second.cancel();
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1);

    // Published while disconnected, delivered on reconnect.
    publisher.upsert(key("B"), 2);

    let third = dictionary.subscribe_channel();
    assert_eq!(snapshot(&third), HashMap::from([(key("A"), 1)]));
    assert_eq!(next(&third), Notification::Inserted { key: key("B"), value: 2 });
    assert_eq!(connects.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cancel_during_burst_keeps_every_modification() {
    let (publisher, dictionary) = live_dictionary();
    let rounds = 10;
    let per_round = 2_000;

    for round in 0..rounds {
        let handle = dictionary.subscribe_channel();
        for i in 0..per_round {
            publisher.upsert(format!("K{}-{}", round, i), i);
        }
        // Cancelled while the burst is still being forwarded.
        handle.cancel();
    }

    let handle = dictionary.subscribe_channel();
    publisher.upsert(key("last"), -1);
    while next(&handle).key() != Some(&key("last")) {}

    let items = dictionary.items().unwrap();
    assert_eq!(items.len(), (rounds * per_round + 1) as usize);
    assert_eq!(items.get("K9-1999"), Some(&1999));
}

#[test]
fn test_dropped_receiver_releases_reference() {
    init_tracing();
    let (publisher, inner) = source::channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let dictionary: Dictionary = ObservableDictionary::new(CountingSource {
        inner,
        connects: Arc::clone(&connects),
        disconnects: Arc::clone(&disconnects),
    })
    .unwrap();

    let handle = dictionary.subscribe_channel();
    snapshot(&handle);
    let SubscriptionHandle {
        subscription,
        receiver,
    } = handle;
    drop(receiver);

    // Delivery fails, the subscriber is detached, the connection closes.
    publisher.upsert(key("A"), 1);
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1);
    subscription.cancel();
}

// --- Configuration ---

#[test]
fn test_bounded_subscriber_is_detached_when_full() {
    init_tracing();
    let (publisher, source) = source::channel();
    let dictionary: Dictionary = ObservableDictionary::builder(source)
        .config(DictionaryConfig {
            name: "bounded".to_string(),
            subscriber_buffer: Some(2),
        })
        .build()
        .unwrap();
    assert_eq!(dictionary.name(), "bounded");

    // Keeps the connection up once the slow subscriber is gone.
    let (anchor, anchor_feed) = crossbeam_channel::unbounded::<FeedEvent<String, i64>>();
    let _anchor = dictionary.subscribe(anchor);
    let slow = dictionary.subscribe_channel();
    for i in 0..10 {
        publisher.upsert(format!("K{}", i), i);
    }

    // Initialised plus one insert fit; the rest overflowed and detached it.
    assert_eq!(next(&slow), Notification::Initialised);
    assert_eq!(next(&slow).kind(), NotificationKind::Inserted);
    assert!(slow.recv_timeout(QUIET).is_err());

    // Others are unaffected.
    let inserted = anchor_feed
        .iter()
        .take(11)
        .filter(|event| matches!(event, FeedEvent::Next(Notification::Inserted { .. })))
        .count();
    assert_eq!(inserted, 10);
    assert_eq!(dictionary.items().unwrap().len(), 10);
}
