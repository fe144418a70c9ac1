//! Bounded, TTL-limited cache of loaded ranges.
//!
//! Entries are immutable snapshots keyed by `(symbol, start, end)` plus
//! whether the rows went back through the pipeline. At
//! capacity the least-recently-inserted entry is evicted; expiry is checked
//! lazily on `get`. Every operation, counters included, runs under one lock.

use crate::domain::ohlcv::ScoredBar;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_MAX_SIZE: usize = 128;
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeKey {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub processed: bool,
}

impl RangeKey {
    /// Key for rows as stored.
    pub fn new(symbol: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            processed: false,
        }
    }

    /// Key for rows re-cleaned and re-scored on load.
    pub fn processed(symbol: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            processed: true,
            ..Self::new(symbol, start, end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub ttl_seconds: u64,
}

#[derive(Debug)]
struct Entry {
    data: Arc<[ScoredBar]>,
    inserted: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RangeKey, Entry>,
    order: VecDeque<RangeKey>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn forget(&mut self, key: &RangeKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

#[derive(Debug)]
pub struct RangeCache {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
}

impl Default for RangeCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, Duration::from_secs(DEFAULT_TTL_SECONDS))
    }
}

impl RangeCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size,
            ttl,
        }
    }

    pub fn get(&self, key: &RangeKey) -> Option<Arc<[ScoredBar]>> {
        self.get_at(key, Instant::now())
    }

    /// `get` with an explicit clock reading.
    pub fn get_at(&self, key: &RangeKey, now: Instant) -> Option<Arc<[ScoredBar]>> {
        let mut inner = self.inner.lock();
        let lookup = inner.entries.get(key).map(|entry| {
            let live = now.saturating_duration_since(entry.inserted) <= self.ttl;
            (live, Arc::clone(&entry.data))
        });
        let fresh = match lookup {
            Some((true, data)) => Some(data),
            Some((false, _)) => {
                debug!(symbol = %key.symbol, "cache entry expired");
                inner.forget(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(data) => {
                inner.hits += 1;
                debug!(symbol = %key.symbol, rows = data.len(), "cache hit");
                Some(data)
            }
            None => {
                inner.misses += 1;
                debug!(symbol = %key.symbol, "cache miss");
                None
            }
        }
    }

    pub fn put(&self, key: RangeKey, data: Arc<[ScoredBar]>) {
        self.put_at(key, data, Instant::now());
    }

    /// `put` with an explicit clock reading. A zero-capacity cache stores
    /// nothing.
    pub fn put_at(&self, key: RangeKey, data: Arc<[ScoredBar]>, now: Instant) {
        if self.max_size == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            inner.forget(&key);
        } else if inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                debug!(symbol = %oldest.symbol, "cache eviction");
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                data,
                inserted: now,
            },
        );
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        debug!(dropped, "cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (
                inner.hits as f64 / lookups as f64,
                inner.misses as f64 / lookups as f64,
            )
        };
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate,
            miss_rate,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
