//! Conflict resolution for upserts that hit an existing key.

use thiserror::Error;

/// A merge policy refused to combine two values.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MergeFault(pub String);

impl MergeFault {
    pub fn new(reason: impl Into<String>) -> Self {
        MergeFault(reason.into())
    }
}

/// Resolves an upsert against an existing value.
///
/// Invoked only when the key is already present. The returned value is
/// stored and published as `Updated`. Any fault is fatal to the dictionary.
pub trait MergePolicy<K, V>: Send + 'static {
    fn merge(&self, key: &K, existing: &V, incoming: &V) -> Result<V, MergeFault>;
}

/// Default policy: the incoming value replaces the existing one.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplaceExisting;

impl<K, V: Clone> MergePolicy<K, V> for ReplaceExisting {
    fn merge(&self, _key: &K, _existing: &V, incoming: &V) -> Result<V, MergeFault> {
        Ok(incoming.clone())
    }
}

/// A closure used as a merge policy.
#[derive(Clone, Copy, Debug)]
pub struct MergeFn<F>(pub F);

impl<K, V, F> MergePolicy<K, V> for MergeFn<F>
where
    F: Fn(&K, &V, &V) -> Result<V, MergeFault> + Send + 'static,
{
    fn merge(&self, key: &K, existing: &V, incoming: &V) -> Result<V, MergeFault> {
        (self.0)(key, existing, incoming)
    }
}

/// Wrap a closure as a [`MergePolicy`].
pub fn merge_fn<K, V, F>(f: F) -> MergeFn<F>
where
    F: Fn(&K, &V, &V) -> Result<V, MergeFault> + Send + 'static,
{
    MergeFn(f)
}
