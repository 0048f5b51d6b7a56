//! Subscription broker types.
//!
//! Subscribers attach through [`ObservableDictionary`](crate::ObservableDictionary)
//! and receive a snapshot of the current state followed by the live feed:
//! - `Existing` for every entry (or `Existing`/`Missing` for a keyed view)
//! - `Initialised` once the view is fully loaded
//! - every later change, with no gap or duplicate at the boundary
//!
//! # Example
//!
//! ```ignore
//! let handle = dictionary.subscribe_channel();
//!
//! loop {
//!     match handle.recv() {
//!         Ok(FeedEvent::Next(Notification::Initialised)) => println!("Loaded"),
//!         Ok(FeedEvent::Next(notification)) => println!("{:?}", notification),
//!         Ok(FeedEvent::Completed) | Ok(FeedEvent::Failed(_)) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub(crate) use manager::SubscriptionManager;
pub use types::{
    FeedEvent, Observer, Subscription, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
