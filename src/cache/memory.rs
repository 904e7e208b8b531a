use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::cache::entry::CacheEntry;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    seq: u64,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, Slot>,
    // Insertion order. Removed keys leave stale `(key, seq)` pairs behind which are
    // skipped on eviction and dropped on compaction.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
    capacity: usize,
    evictions: u64,
    // Bumped by every explicit removal, whether or not anything was present.
    removal_epoch: u64,
}

impl Inner {
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, seq)) = self.order.pop_front() {
            let current = self.entries.get(&key).map(|slot| slot.seq);
            if current == Some(seq) {
                self.entries.remove(&key);
                self.evictions += 1;
                return Some(key);
            }
        }
        None
    }

    fn compact_order(&mut self) {
        if self.order.len() <= self.entries.len() * 2 + 16 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).map(|slot| slot.seq) == Some(*seq));
    }
}

/// Snapshot of the memory tier occupancy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryTierStats {
    pub size: usize,
    pub max_size: usize,
    pub usage_pct: f64,
    pub evictions: u64,
}

/// Bounded, process-local cache table.
///
/// Eviction is FIFO by insertion: once `capacity` distinct keys are held, inserting
/// a new key drops the earliest inserted key still present, regardless of how
/// recently it was read. Overwriting an existing key keeps its original position.
/// All operations take one short lock and never await.
#[derive(Debug)]
pub struct MemoryTier {
    inner: Mutex<Inner>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
                capacity: capacity.max(1),
                evictions: 0,
                removal_epoch: 0,
            }),
        }
    }

    /// Returns a live entry. An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let live = inner.entries.get(key)?.entry.is_live_at(now);
        if live {
            inner.entries.get(key).map(|slot| slot.entry.clone())
        } else {
            inner.entries.remove(key);
            None
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) -> Option<String> {
        self.insert(CacheEntry::new(key, value, ttl))
    }

    /// Inserts or overwrites an entry, returning the key evicted to make room, if any.
    pub fn insert(&self, entry: CacheEntry) -> Option<String> {
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.entries.get_mut(&entry.key) {
            slot.entry = entry;
            return None;
        }

        Self::push(&mut inner, entry)
    }

    /// Current removal epoch. Capture it before reading a slower tier and hand it
    /// back to [`MemoryTier::insert_if_epoch`].
    pub fn removal_epoch(&self) -> u64 {
        self.inner.lock().removal_epoch
    }

    /// Inserts `entry` only if no removal happened since `epoch` was captured and
    /// the key is not already held. Returns whether the entry was inserted.
    pub fn insert_if_epoch(&self, entry: CacheEntry, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.removal_epoch != epoch || inner.entries.contains_key(&entry.key) {
            return false;
        }
        Self::push(&mut inner, entry);
        true
    }

    fn push(inner: &mut Inner, entry: CacheEntry) -> Option<String> {
        let evicted = if inner.entries.len() >= inner.capacity {
            inner.evict_oldest()
        } else {
            None
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((entry.key.clone(), seq));
        inner.entries.insert(entry.key.clone(), Slot { entry, seq });
        inner.compact_order();

        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.removal_epoch += 1;
        inner.entries.remove(key).is_some()
    }

    /// Removes every entry matching `predicate`, returning the removed keys.
    pub fn delete_matching<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut inner = self.inner.lock();
        inner.removal_epoch += 1;
        Self::remove_where(&mut inner, predicate)
    }

    fn remove_where<F>(inner: &mut Inner, predicate: F) -> Vec<String>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let doomed: Vec<String> = inner
            .entries
            .values()
            .filter(|slot| predicate(&slot.entry))
            .map(|slot| slot.entry.key.clone())
            .collect();

        for key in &doomed {
            inner.entries.remove(key);
        }
        inner.compact_order();

        doomed
    }

    /// Removes entries whose expiry has passed. O(size).
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        Self::remove_where(&mut inner, |entry| !entry.is_live_at(now)).len()
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.removal_epoch += 1;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        count
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|slot| slot.entry.is_live_at(now))
            .unwrap_or(false)
    }

    /// Live keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter(|(key, seq)| {
                inner
                    .entries
                    .get(key)
                    .map(|slot| slot.seq == *seq && slot.entry.is_live_at(now))
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Changes the bound, evicting oldest insertions until the table fits.
    pub fn set_capacity(&self, capacity: usize) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.capacity = capacity.max(1);

        let mut evicted = Vec::new();
        while inner.entries.len() > inner.capacity {
            match inner.evict_oldest() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    pub fn stats(&self) -> MemoryTierStats {
        let inner = self.inner.lock();
        let size = inner.entries.len();
        MemoryTierStats {
            size,
            max_size: inner.capacity,
            usage_pct: size as f64 / inner.capacity as f64 * 100.0,
            evictions: inner.evictions,
        }
    }
}
