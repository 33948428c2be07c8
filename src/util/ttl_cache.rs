//! Bounded TTL cache used for debounce and dedup maps.
//!
//! Entries expire after a fixed time-to-live measured on the injected [`Clock`],
//! and the cache never holds more than `capacity` entries: inserting into a full
//! cache first drops expired entries, then the oldest one.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::util::clock::SharedClock;

struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Thread-safe bounded cache with time-based expiry.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache with the given TTL and capacity (minimum 1).
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Live value for `key`, if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now - entry.stored_at < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite `key`, returning the previous live value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let previous = entries
            .remove(&key)
            .filter(|e| now - e.stored_at < self.ttl)
            .map(|e| e.value);
        self.make_room(&mut entries, now);
        entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
            },
        );
        previous
    }

    /// Insert only if no live entry exists. Returns `true` when inserted.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// racing on the same key see exactly one winner.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries
            .get(&key)
            .is_some_and(|e| now - e.stored_at < self.ttl)
        {
            return false;
        }
        self.make_room(&mut entries, now);
        entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
            },
        );
        true
    }

    fn make_room(&self, entries: &mut HashMap<K, Entry<V>>, now: DateTime<Utc>) {
        if entries.len() < self.capacity {
            return;
        }
        let ttl = self.ttl;
        entries.retain(|_, e| now - e.stored_at < ttl);
        if entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
    }

    /// Remove `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    /// Number of stored entries, including ones that have expired but not yet been evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
