//! Core value types: modifications flowing in, notifications flowing out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::ops::BitOr;

/// Bounds every dictionary key satisfies.
pub trait DictionaryKey: Eq + Hash + Clone + fmt::Debug + Send + 'static {}

impl<T> DictionaryKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + 'static {}

/// Bounds every dictionary value satisfies.
pub trait DictionaryValue: Clone + Send + 'static {}

impl<T> DictionaryValue for T where T: Clone + Send + 'static {}

/// A single intended change to the dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modification<K, V> {
    /// Insert the value, or merge it into the existing one.
    Upsert { key: K, value: V },
    /// Overwrite the existing value. Inserts when the key is missing.
    Replace { key: K, value: V },
    /// Remove the key if present.
    Remove { key: K },
    /// Remove every key.
    Clear,
}

impl<K, V> Modification<K, V> {
    pub fn upsert(key: K, value: V) -> Self {
        Modification::Upsert { key, value }
    }

    pub fn replace(key: K, value: V) -> Self {
        Modification::Replace { key, value }
    }

    pub fn remove(key: K) -> Self {
        Modification::Remove { key }
    }

    pub fn clear() -> Self {
        Modification::Clear
    }

    /// The targeted key, `None` for `Clear`.
    pub fn key(&self) -> Option<&K> {
        match self {
            Modification::Upsert { key, .. }
            | Modification::Replace { key, .. }
            | Modification::Remove { key } => Some(key),
            Modification::Clear => None,
        }
    }

    /// Short lowercase name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Modification::Upsert { .. } => "upsert",
            Modification::Replace { .. } => "replace",
            Modification::Remove { .. } => "remove",
            Modification::Clear => "clear",
        }
    }
}

/// The kind of a [`Notification`], one bit each so kinds compose into a [`KindSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum NotificationKind {
    Initialised = 1,
    Missing = 1 << 1,
    Removed = 1 << 2,
    KeyCleared = 1 << 3,
    DictionaryCleared = 1 << 4,
    Existing = 1 << 5,
    Inserted = 1 << 6,
    Updated = 1 << 7,
    Replaced = 1 << 8,
}

impl NotificationKind {
    /// Every kind, in bit order.
    pub const ALL: [NotificationKind; 9] = [
        NotificationKind::Initialised,
        NotificationKind::Missing,
        NotificationKind::Removed,
        NotificationKind::KeyCleared,
        NotificationKind::DictionaryCleared,
        NotificationKind::Existing,
        NotificationKind::Inserted,
        NotificationKind::Updated,
        NotificationKind::Replaced,
    ];

    pub const fn bit(self) -> u16 {
        self as u16
    }

    /// No current value travels with this kind.
    pub const fn is_meta(self) -> bool {
        KindSet::META.contains(self)
    }

    /// The key's current value travels with this kind.
    pub const fn is_value(self) -> bool {
        KindSet::VALUES.contains(self)
    }
}

/// A set of notification kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u16);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    /// Initialised, Missing, Removed, KeyCleared and DictionaryCleared.
    pub const META: KindSet = KindSet(
        NotificationKind::Initialised.bit()
            | NotificationKind::Missing.bit()
            | NotificationKind::Removed.bit()
            | NotificationKind::KeyCleared.bit()
            | NotificationKind::DictionaryCleared.bit(),
    );

    /// Existing, Inserted, Updated and Replaced.
    pub const VALUES: KindSet = KindSet(
        NotificationKind::Existing.bit()
            | NotificationKind::Inserted.bit()
            | NotificationKind::Updated.bit()
            | NotificationKind::Replaced.bit(),
    );

    pub const ALL: KindSet = KindSet(KindSet::META.0 | KindSet::VALUES.0);

    pub const fn of(kind: NotificationKind) -> Self {
        KindSet(kind.bit())
    }

    pub const fn with(self, kind: NotificationKind) -> Self {
        KindSet(self.0 | kind.bit())
    }

    pub const fn union(self, other: KindSet) -> Self {
        KindSet(self.0 | other.0)
    }

    pub const fn contains(self, kind: NotificationKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = NotificationKind> {
        NotificationKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<NotificationKind> for KindSet {
    fn from(kind: NotificationKind) -> Self {
        KindSet::of(kind)
    }
}

impl BitOr for KindSet {
    type Output = KindSet;

    fn bitor(self, rhs: KindSet) -> KindSet {
        self.union(rhs)
    }
}

impl BitOr<NotificationKind> for KindSet {
    type Output = KindSet;

    fn bitor(self, rhs: NotificationKind) -> KindSet {
        self.with(rhs)
    }
}

impl BitOr for NotificationKind {
    type Output = KindSet;

    fn bitor(self, rhs: NotificationKind) -> KindSet {
        KindSet::of(self).with(rhs)
    }
}

/// An observed effect of applying a modification, or a lifecycle meta-event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification<K, V> {
    /// End of a snapshot replay, or end of the initial modification stream.
    Initialised,
    /// The looked-up key is absent.
    Missing { key: K },
    /// The key was present when the snapshot was taken.
    Existing { key: K, value: V },
    /// The key was added.
    Inserted { key: K, value: V },
    /// An upsert merged into an existing value.
    Updated {
        key: K,
        /// Result of the merge policy.
        value: V,
        /// The incoming upsert value.
        updating_value: V,
        previous_value: V,
    },
    /// A replace overwrote an existing value.
    Replaced { key: K, value: V, previous_value: V },
    /// The key was removed.
    Removed { key: K, previous_value: V },
    /// The key was dropped by a clear.
    KeyCleared { key: K, previous_value: V },
    /// A clear finished. Follows every `KeyCleared` of the same clear.
    DictionaryCleared,
}

impl<K, V> Notification<K, V> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Initialised => NotificationKind::Initialised,
            Notification::Missing { .. } => NotificationKind::Missing,
            Notification::Existing { .. } => NotificationKind::Existing,
            Notification::Inserted { .. } => NotificationKind::Inserted,
            Notification::Updated { .. } => NotificationKind::Updated,
            Notification::Replaced { .. } => NotificationKind::Replaced,
            Notification::Removed { .. } => NotificationKind::Removed,
            Notification::KeyCleared { .. } => NotificationKind::KeyCleared,
            Notification::DictionaryCleared => NotificationKind::DictionaryCleared,
        }
    }

    pub fn key(&self) -> Option<&K> {
        match self {
            Notification::Missing { key }
            | Notification::Existing { key, .. }
            | Notification::Inserted { key, .. }
            | Notification::Updated { key, .. }
            | Notification::Replaced { key, .. }
            | Notification::Removed { key, .. }
            | Notification::KeyCleared { key, .. } => Some(key),
            Notification::Initialised | Notification::DictionaryCleared => None,
        }
    }

    /// The key's current value. Only set for value kinds.
    pub fn value(&self) -> Option<&V> {
        match self {
            Notification::Existing { value, .. }
            | Notification::Inserted { value, .. }
            | Notification::Updated { value, .. }
            | Notification::Replaced { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn updating_value(&self) -> Option<&V> {
        match self {
            Notification::Updated { updating_value, .. } => Some(updating_value),
            _ => None,
        }
    }

    /// The value held before the change (or the removed/cleared value).
    pub fn previous_value(&self) -> Option<&V> {
        match self {
            Notification::Updated { previous_value, .. }
            | Notification::Replaced { previous_value, .. }
            | Notification::Removed { previous_value, .. }
            | Notification::KeyCleared { previous_value, .. } => Some(previous_value),
            _ => None,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.kind().is_meta()
    }
}
