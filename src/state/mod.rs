//! The authoritative key-value map and the sequential modification engine.
//!
//! Every modification is applied by a single writer, in arrival order. Each
//! application mutates the map and yields the notifications describing what
//! changed; a failed application leaves the map untouched.

mod operations;
mod store;

pub use operations::apply_modification;
pub use store::StateStore;
