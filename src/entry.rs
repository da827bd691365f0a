//! One cache record: value plus TTL/staleness bookkeeping.
//!
//! Grounded on `examples/original_source/proxy/src/entry.c` (`Entry_new`,
//! `Entry_touch`, `Entry_update`, `Entry_is_older`, `Entry_delete`), adapted
//! to owned Rust types: `created_at` is a monotonic [`Instant`] rather than a
//! `CLOCK_REALTIME` double, and there is no `deleted`-flag-plus-manual-free
//! dance — `Cache` simply replaces the `Option<Entry>` slot with `None`.

use std::time::{Duration, Instant};

use crate::http::Response;

/// A cached response, keyed by `host || path`, with a TTL measured from the
/// moment it entered the cache.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: Response,
    created_at: Instant,
    max_age: Duration,
    ttl: Duration,
    stale: bool,
    pub retrieved: bool,
}

impl Entry {
    pub fn new(key: String, value: Response, max_age: Duration) -> Self {
        let mut entry = Entry {
            key,
            value,
            created_at: Instant::now(),
            max_age,
            ttl: max_age,
            stale: max_age.is_zero(),
            retrieved: false,
        };
        entry.touch();
        entry
    }

    /// Recomputes `ttl` and `stale` from the monotonic clock.
    /// `ttl = max_age - (now - created_at)`; `stale = (ttl <= 0)`.
    pub fn touch(&mut self) {
        let age = self.created_at.elapsed();
        self.ttl = self.max_age.saturating_sub(age);
        self.stale = age >= self.max_age;
    }

    /// Releases the prior value by replacing it, resetting TTL/staleness.
    pub fn update(&mut self, value: Response, max_age: Duration) {
        self.value = value;
        self.created_at = Instant::now();
        self.max_age = max_age;
        self.ttl = max_age;
        self.stale = max_age.is_zero();
        self.retrieved = false;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Strict: `self.created_at < other.created_at`.
    pub fn is_older_than(&self, other: &Entry) -> bool {
        self.created_at < other.created_at
    }
}
