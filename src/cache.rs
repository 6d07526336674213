//! Content-addressed cache for computed values.
//!
//! Keys are content hashes produced by the caller; the store knows nothing
//! about routing. Safe for concurrent readers and writers; racing puts on
//! the same key are last-write-wins and never corrupt the map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct CacheStore<V> {
    entries: RwLock<HashMap<u64, Entry<V>>>,
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a clone of the live value, pruning an expired entry.
    pub fn get(&self, key: u64) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                None => return None,
                Some(entry) if !entry.expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(&key);
        }
        None
    }

    pub fn put(&self, key: u64, value: V, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries.write().insert(key, Entry { value, expires_at });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
