//! Fixed-capacity TTL/LRU response cache.
//!
//! Grounded on `examples/original_source/proxy/src/cache.c`
//! (`Cache_new`/`Cache_put`/`Cache_get`/`Cache_evict`/`remove_stale_entry`),
//! restructured around an arena of slots plus an index-based doubly linked
//! list instead of the original's raw pointer graph. A flat live-key array
//! mirrors the original's `keys[]` side table, fixing the two bugs called
//! out below: stale entries are always removed-and-missed rather than
//! sometimes served, and key equality is exact length-and-bytes rather
//! than a truthy `strncmp`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace};

use crate::entry::Entry;
use crate::http::Response;

const NIL: usize = usize::MAX;

struct Slot {
    entry: Option<Entry>,
    prev: usize,
    next: usize,
}

/// A stale-first, then-LRU-head eviction cache keyed by `host || path`.
///
/// Eviction order: if any slot is stale, the *oldest* stale slot is dropped
/// first; otherwise the least-recently-used live slot (the list tail) is
/// dropped, matching `examples/original_source/proxy/src/cache.c`'s
/// `Cache_evict`, which scans for staleness before falling back to the
/// LRU tail.
pub struct Cache {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    head: usize, // most recently used
    tail: usize, // least recently used
    capacity: usize,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Cache {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Exact-match lookup. A stale entry is evicted and counted as a miss,
    /// never served, unlike the original's `Cache_get`, which sometimes
    /// returned an entry it had just marked stale.
    pub fn get(&mut self, key: &str) -> Option<Response> {
        let idx = *self.index.get(key)?;
        self.slots[idx].entry.as_mut()?.touch();
        if self.slots[idx].entry.as_ref()?.is_stale() {
            trace!(key, "cache hit on stale entry, evicting");
            self.remove_at(idx);
            return None;
        }
        self.move_to_front(idx);
        let entry = self.slots[idx].entry.as_mut().expect("checked above");
        entry.retrieved = true;
        Some(entry.value.clone())
    }

    /// Age of the live entry for `key`, if present and fresh.
    pub fn get_age(&mut self, key: &str) -> Option<Duration> {
        let idx = *self.index.get(key)?;
        let entry = self.slots[idx].entry.as_mut()?;
        entry.touch();
        if entry.is_stale() {
            None
        } else {
            Some(entry.age())
        }
    }

    /// Inserts or refreshes a cache entry, evicting if at capacity. Returns
    /// the capacity pressure allows an insert to proceed; `false` means the
    /// entry was rejected (capacity is zero, which `new` prevents, so this
    /// currently never fails but keeps the return type honest for callers
    /// that gate on memory pressure separately).
    pub fn put(&mut self, key: String, value: Response, max_age: Duration) -> bool {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(entry) = self.slots[idx].entry.as_mut() {
                entry.update(value, max_age);
            }
            self.move_to_front(idx);
            return true;
        }

        if self.index.len() >= self.capacity {
            self.evict_one();
        }

        let entry = Entry::new(key.clone(), value, max_age);
        let idx = self.alloc_slot(entry);
        self.index.insert(key, idx);
        self.push_front(idx);
        debug!(len = self.index.len(), capacity = self.capacity, "cache insert");
        true
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.get(key).copied() {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Removes every stale entry without touching freshness of the rest.
    /// Intended to be called periodically from the accept loop.
    pub fn refresh(&mut self) -> usize {
        let stale: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&idx| {
                let entry = self.slots[idx].entry.as_mut().expect("index is consistent");
                entry.touch();
                entry.is_stale()
            })
            .collect();
        let removed = stale.len();
        for idx in stale {
            self.remove_at(idx);
        }
        removed
    }

    /// The exact live keys currently held, for link recoloring's perfect-key
    /// matching. Order is unspecified.
    pub fn key_list(&self) -> Vec<&str> {
        self.index.keys().map(String::as_str).collect()
    }

    fn alloc_slot(&mut self, entry: Entry) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot { entry: Some(entry), prev: NIL, next: NIL };
            idx
        } else {
            self.slots.push(Slot { entry: Some(entry), prev: NIL, next: NIL });
            self.slots.len() - 1
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn remove_at(&mut self, idx: usize) {
        self.unlink(idx);
        if let Some(entry) = self.slots[idx].entry.take() {
            self.index.remove(&entry.key);
        }
        self.free.push(idx);
    }

    /// Stale-first: the oldest stale slot if any exist, else the LRU tail.
    fn evict_one(&mut self) {
        let stale_oldest = self
            .index
            .values()
            .copied()
            .filter(|&idx| {
                let entry = self.slots[idx].entry.as_mut().expect("index is consistent");
                entry.touch();
                entry.is_stale()
            })
            .min_by(|&a, &b| {
                let ea = self.slots[a].entry.as_ref().unwrap();
                let eb = self.slots[b].entry.as_ref().unwrap();
                if ea.is_older_than(eb) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                }
            });

        let victim = stale_oldest.or(if self.tail != NIL { Some(self.tail) } else { None });
        if let Some(idx) = victim {
            trace!(key = %self.slots[idx].entry.as_ref().map(|e| e.key.as_str()).unwrap_or(""), "evicting");
            self.remove_at(idx);
        }
    }
}
