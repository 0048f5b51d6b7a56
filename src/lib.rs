//! # Observable Dictionary
//!
//! A live key-value view materialized from an ordered stream of
//! modifications, republishing every change to any number of subscribers.
//!
//! ## Core Concepts
//!
//! - **Modifications**: Upsert, Replace, Remove and Clear commands from an upstream source
//! - **Notifications**: The observed effect of each modification, plus lifecycle meta-events
//! - **Snapshot-then-live**: Every subscriber sees the current state once, then every later change
//! - **Reference-counted upstream**: The source is connected only while someone is subscribed
//!
//! ## Example
//!
//! ```ignore
//! use observable_dictionary::{source, FeedEvent, ObservableDictionary};
//!
//! let (publisher, source) = source::channel();
//! let dictionary = ObservableDictionary::builder(source)
//!     .merge_with(|_key, existing: &i64, incoming: &i64| Ok(existing + incoming))
//!     .build()?;
//!
//! let handle = dictionary.subscribe_channel();
//! publisher.upsert("AAPL".to_string(), 10);
//! publisher.upsert("AAPL".to_string(), 5);
//!
//! while let Ok(FeedEvent::Next(notification)) = handle.recv() {
//!     println!("{:?}", notification);
//! }
//! ```

pub mod adapters;
pub mod dictionary;
pub mod error;
pub mod merge;
pub mod signal;
pub mod source;
pub mod state;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use adapters::{CompleteOn, ObserverExt, Only, ThrowOnMissing};
pub use dictionary::{DictionaryBuilder, DictionaryConfig, ObservableDictionary};
pub use error::{DictionaryError, Result};
pub use merge::{merge_fn, MergeFault, MergeFn, MergePolicy, ReplaceExisting};
pub use signal::InitialisedSignal;
pub use source::{
    ChannelSource, Connection, IterSource, ModificationPublisher, ModificationSink,
    ModificationSource,
};
pub use state::{apply_modification, StateStore};
pub use subscriptions::{
    FeedEvent, Observer, Subscription, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
pub use types::*;
