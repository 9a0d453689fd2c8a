//! L1 session cache
//!
//! Process-global bounded LRU over structured entry keys. Entries carry
//! their own deadline and expire lazily on read; there is no sweeper
//! thread. Namespacing is inherited from the keys themselves, so one map
//! serves every tenant without cross-tenant visibility.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::SessionCacheConfig;
use crate::observability::CounterRegistry;

#[derive(Debug, Clone)]
struct SessionEntry {
    payload: String,
    expires_at: Instant,
}

/// Bounded in-process LRU with lazy TTL expiry
pub struct SessionCache {
    entries: Mutex<LruCache<String, SessionEntry>>,
    default_ttl: Duration,
    counters: CounterRegistry,
}

impl SessionCache {
    /// Create a session cache from configuration
    pub fn new(config: &SessionCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl: Duration::from_secs(config.ttl_secs),
            counters: CounterRegistry::new(),
        }
    }

    /// Look up a payload; expired entries are dropped on observation
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.counters.incr("session.hits");
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.counters.incr("session.expired");
                None
            }
            None => {
                self.counters.incr("session.misses");
                None
            }
        }
    }

    /// Insert a payload with the session TTL, clamped to the entry's own
    /// remaining TTL so L1 never outlives L2
    pub fn put(&self, key: &str, payload: &str, entry_ttl_secs: u64) {
        let ttl = self.default_ttl.min(Duration::from_secs(entry_ttl_secs));
        if ttl.is_zero() {
            return;
        }
        let entry = SessionEntry {
            payload: payload.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().put(key.to_string(), entry);
        self.counters.incr("session.puts");
    }

    /// Drop a key; no-op when absent
    pub fn remove(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    /// Drop every key; used on namespace-wide invalidation
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Live entry count (including not-yet-reaped expired entries)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot for the gateway stats surface
    pub fn metrics(&self) -> std::collections::HashMap<String, u64> {
        self.counters.snapshot()
    }
}
