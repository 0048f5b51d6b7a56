//! Modification application.

use crate::error::{DictionaryError, Result};
use crate::merge::MergePolicy;
use crate::types::{Modification, Notification};
use std::any::Any;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};

/// Apply a modification to the map, returning the notifications it produced.
///
/// On error the map is left exactly as it was.
pub fn apply_modification<K, V>(
    entries: &mut HashMap<K, V>,
    modification: Modification<K, V>,
    policy: &dyn MergePolicy<K, V>,
) -> Result<Vec<Notification<K, V>>>
where
    K: Eq + Hash + Clone + Debug + 'static,
    V: Clone + 'static,
{
    match modification {
        Modification::Upsert { key, value } => {
            upsert(entries, key, value, policy).map(|notification| vec![notification])
        }

        Modification::Replace { key, value } => match entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous_value = slot.insert(value.clone());
                Ok(vec![Notification::Replaced {
                    key: slot.key().clone(),
                    value,
                    previous_value,
                }])
            }
            // Nothing to replace: insert instead of reporting a replace without a prior value.
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(value.clone());
                Ok(vec![Notification::Inserted { key, value }])
            }
        },

        Modification::Remove { key } => Ok(entries
            .remove_entry(&key)
            .map(|(key, previous_value)| Notification::Removed { key, previous_value })
            .into_iter()
            .collect()),

        Modification::Clear => {
            let mut notifications: Vec<_> = entries
                .drain()
                .map(|(key, previous_value)| Notification::KeyCleared { key, previous_value })
                .collect();
            notifications.push(Notification::DictionaryCleared);
            Ok(notifications)
        }
    }
}

fn upsert<K, V>(
    entries: &mut HashMap<K, V>,
    key: K,
    value: V,
    policy: &dyn MergePolicy<K, V>,
) -> Result<Notification<K, V>>
where
    K: Eq + Hash + Clone + Debug + 'static,
    V: Clone + 'static,
{
    match entries.entry(key) {
        Entry::Vacant(slot) => {
            let key = slot.key().clone();
            slot.insert(value.clone());
            Ok(Notification::Inserted { key, value })
        }
        Entry::Occupied(mut slot) => {
            let merged = merge(policy, slot.key(), slot.get(), &value)?;
            let previous_value = slot.insert(merged.clone());
            Ok(Notification::Updated {
                key: slot.key().clone(),
                value: merged,
                updating_value: value,
                previous_value,
            })
        }
    }
}

/// Run the policy, turning both returned faults and panics into `MergeFailure`.
fn merge<K: Debug + 'static, V: 'static>(
    policy: &dyn MergePolicy<K, V>,
    key: &K,
    existing: &V,
    incoming: &V,
) -> Result<V> {
    match panic::catch_unwind(AssertUnwindSafe(|| policy.merge(key, existing, incoming))) {
        Ok(Ok(merged)) => Ok(merged),
        Ok(Err(fault)) => Err(DictionaryError::MergeFailure {
            key: format!("{:?}", key),
            reason: fault.to_string(),
        }),
        Err(payload) => Err(DictionaryError::MergeFailure {
            key: format!("{:?}", key),
            reason: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("merge policy panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("merge policy panicked: {}", message)
    } else {
        "merge policy panicked".to_string()
    }
}
