//! Requests serialized through the writer's queue.

use crate::subscriptions::{Observer, SubscriptionFilter, SubscriptionId};
use crate::types::Modification;

/// Which of the two concatenated streams a connection feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Replayed on every connection; stale items are dropped.
    Initial,
    /// Consumed once; items already taken from the source are always applied.
    Live,
}

/// Everything that touches the state or the subscriber registry goes through
/// one queue, so the writer sees a single total order.
pub(crate) enum Command<K, V> {
    Subscribe {
        id: SubscriptionId,
        filter: SubscriptionFilter<K>,
        observer: Box<dyn Observer<K, V>>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Apply {
        epoch: u64,
        stage: Stage,
        modification: Modification<K, V>,
    },
    SourceCompleted {
        epoch: u64,
        stage: Stage,
    },
    SourceFailed {
        epoch: u64,
        stage: Stage,
        reason: String,
    },
    Dispose,
}
