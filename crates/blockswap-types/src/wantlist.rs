//! The wantlist: a reference-counted set of wanted keys.
//!
//! Multiple overlapping local requests may want the same key; the reference
//! count makes sure a key stays wanted until the last interested request
//! releases it. `Wantlist` is single-owner; `ThreadSafeWantlist` wraps it in
//! a readers-writer lock and hands out snapshot copies only.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::Key;

/// A single wanted key with its transmission priority and reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantlistEntry {
    /// The wanted key.
    pub key: Key,
    /// Transmission priority; higher is more urgent.
    pub priority: i32,
    /// Number of live local requests referencing the key.
    pub ref_cnt: u32,
}

impl WantlistEntry {
    /// Create an entry with a reference count of one.
    pub fn new(key: Key, priority: i32) -> Self {
        Self {
            key,
            priority,
            ref_cnt: 1,
        }
    }
}

/// Mapping from key to wantlist entry. Not thread-safe.
#[derive(Debug, Default)]
pub struct Wantlist {
    set: HashMap<Key, WantlistEntry>,
}

impl Wantlist {
    /// Create an empty wantlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` at `priority`, or bump the reference count if present.
    ///
    /// Returns true iff the key was newly inserted.
    pub fn add(&mut self, key: Key, priority: i32) -> bool {
        if let Some(entry) = self.set.get_mut(&key) {
            entry.ref_cnt += 1;
            return false;
        }
        self.set.insert(key.clone(), WantlistEntry::new(key, priority));
        true
    }

    /// Insert a prebuilt entry, or bump the reference count if present.
    ///
    /// Returns true iff the key was newly inserted.
    pub fn add_entry(&mut self, entry: WantlistEntry) -> bool {
        if let Some(existing) = self.set.get_mut(&entry.key) {
            existing.ref_cnt += 1;
            return false;
        }
        self.set.insert(entry.key.clone(), entry);
        true
    }

    /// Drop one reference to `key`, deleting the entry when none remain.
    ///
    /// Returns true iff the entry was physically removed.
    pub fn remove(&mut self, key: &Key) -> bool {
        let Some(entry) = self.set.get_mut(key) else {
            return false;
        };
        entry.ref_cnt = entry.ref_cnt.saturating_sub(1);
        if entry.ref_cnt == 0 {
            self.set.remove(key);
            return true;
        }
        false
    }

    /// Look up the entry for `key`.
    pub fn contains(&self, key: &Key) -> Option<&WantlistEntry> {
        self.set.get(key)
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> Vec<WantlistEntry> {
        self.set.values().cloned().collect()
    }

    /// All entries, highest priority first.
    pub fn sorted_entries(&self) -> Vec<WantlistEntry> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    /// Number of wanted keys.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// True when nothing is wanted.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Thread-safe wantlist: all mutations serialized, concurrent readers
/// receive snapshots rather than references into the map.
#[derive(Debug, Default)]
pub struct ThreadSafeWantlist {
    inner: RwLock<Wantlist>,
}

impl ThreadSafeWantlist {
    /// Create an empty thread-safe wantlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`Wantlist::add`].
    pub fn add(&self, key: Key, priority: i32) -> bool {
        self.inner.write().add(key, priority)
    }

    /// See [`Wantlist::add_entry`].
    pub fn add_entry(&self, entry: WantlistEntry) -> bool {
        self.inner.write().add_entry(entry)
    }

    /// See [`Wantlist::remove`].
    pub fn remove(&self, key: &Key) -> bool {
        self.inner.write().remove(key)
    }

    /// Snapshot of the entry for `key`, if wanted.
    pub fn contains(&self, key: &Key) -> Option<WantlistEntry> {
        self.inner.read().contains(key).cloned()
    }

    /// Snapshot of all entries, in no particular order.
    pub fn entries(&self) -> Vec<WantlistEntry> {
        self.inner.read().entries()
    }

    /// Snapshot of all entries, highest priority first.
    pub fn sorted_entries(&self) -> Vec<WantlistEntry> {
        self.inner.read().sorted_entries()
    }

    /// Number of wanted keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing is wanted.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
