//! The in-memory map owned by the writer.

use super::operations::apply_modification;
use crate::error::Result;
use crate::merge::{MergePolicy, ReplaceExisting};
use crate::types::{DictionaryKey, DictionaryValue, Modification, Notification};
use std::collections::HashMap;

/// Authoritative key-value state plus the merge policy used by upserts.
pub struct StateStore<K, V> {
    entries: HashMap<K, V>,
    policy: Box<dyn MergePolicy<K, V>>,
}

impl<K: DictionaryKey, V: DictionaryValue> StateStore<K, V> {
    /// Create an empty store with the given merge policy.
    pub fn new<P: MergePolicy<K, V>>(policy: P) -> Self {
        Self::with_boxed_policy(Box::new(policy))
    }

    pub(crate) fn with_boxed_policy(policy: Box<dyn MergePolicy<K, V>>) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    /// Apply one modification. The map is unchanged when this fails.
    pub fn apply(&mut self, modification: Modification<K, V>) -> Result<Vec<Notification<K, V>>> {
        apply_modification(&mut self.entries, modification, self.policy.as_ref())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// `Existing` notifications for every entry, in map order.
    pub fn snapshot(&self) -> impl Iterator<Item = Notification<K, V>> + '_ {
        self.entries.iter().map(|(key, value)| Notification::Existing {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// `Existing` if the key is present, `Missing` otherwise.
    pub fn lookup(&self, key: &K) -> Notification<K, V> {
        match self.entries.get(key) {
            Some(value) => Notification::Existing {
                key: key.clone(),
                value: value.clone(),
            },
            None => Notification::Missing { key: key.clone() },
        }
    }

    pub fn entries(&self) -> &HashMap<K, V> {
        &self.entries
    }
}

impl<K: DictionaryKey, V: DictionaryValue> Default for StateStore<K, V> {
    fn default() -> Self {
        Self::new(ReplaceExisting)
    }
}
