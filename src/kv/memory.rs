//! In-memory KV driver
//!
//! Backs tests and the demo binary. TTL expiry is lazy: entries are dropped
//! when an operation observes them past their deadline. Supports two fault
//! injection knobs for failure-path tests: a full outage switch and a
//! fail-batch-after-N trigger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{BatchOutcome, KvCommand, KvError, KvResult, KvStore, glob_to_regex};

/// Stored value shape
#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// In-memory KV store with lazy TTL expiry and fault injection
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
    offline: Arc<AtomicBool>,
    fail_batch_after: Arc<Mutex<Option<usize>>>,
}

impl MemoryKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every operation fails until cleared
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Arm the batch fault: the next batch applies `n` commands then fails
    pub fn fail_next_batch_after(&self, n: usize) {
        *self.fail_batch_after.lock() = Some(n);
    }

    /// Number of live (unexpired) keys; test helper
    pub fn live_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    fn check_online(&self) -> KvResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(KvError::Connection("kv store offline".into()))
        } else {
            Ok(())
        }
    }

    /// Drop the entry if expired; returns whether a live entry remains
    fn reap(&self, key: &str) -> bool {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return false;
            }
            return true;
        }
        false
    }

    fn put(&self, key: &str, value: Stored, ttl_secs: Option<u64>) {
        let expires_at = ttl_secs.map(|s| Instant::now() + Duration::from_secs(s));
        self.entries.insert(
            key.to_string(),
            Entry { value, expires_at },
        );
    }

    /// Apply one batch command; used by both `batch` and direct ops
    fn apply(&self, command: &KvCommand) -> KvResult<()> {
        match command {
            KvCommand::Set { key, value } => {
                self.put(key, Stored::Str(value.clone()), None);
                Ok(())
            }
            KvCommand::SetEx { key, ttl_secs, value } => {
                self.put(key, Stored::Str(value.clone()), Some(*ttl_secs));
                Ok(())
            }
            KvCommand::Del { keys } => {
                for key in keys {
                    self.entries.remove(key);
                }
                Ok(())
            }
            KvCommand::HSet { key, fields } => {
                self.hset_sync(key, fields)
            }
            KvCommand::HIncrBy { key, field, delta } => {
                self.hincrby_sync(key, field, *delta).map(|_| ())
            }
            KvCommand::SAdd { key, members } => {
                self.sadd_sync(key, members).map(|_| ())
            }
            KvCommand::SRem { key, members } => {
                self.srem_sync(key, members);
                Ok(())
            }
            KvCommand::Incr { key } => self.incrby_sync(key, 1).map(|_| ()),
            KvCommand::IncrBy { key, delta } => self.incrby_sync(key, *delta).map(|_| ()),
            KvCommand::Expire { key, ttl_secs } => {
                self.expire_sync(key, *ttl_secs);
                Ok(())
            }
        }
    }

    fn hset_sync(&self, key: &str, fields: &[(String, String)]) -> KvResult<()> {
        self.reap(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Stored::Hash(HashMap::new()),
                expires_at: None,
            });
        match &mut entry.value {
            Stored::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            _ => Err(KvError::Command(format!("WRONGTYPE key {} is not a hash", key))),
        }
    }

    fn hincrby_sync(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.reap(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Stored::Hash(HashMap::new()),
                expires_at: None,
            });
        match &mut entry.value {
            Stored::Hash(map) => {
                let current: i64 = map
                    .get(field)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let next = current + delta;
                map.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            _ => Err(KvError::Command(format!("WRONGTYPE key {} is not a hash", key))),
        }
    }

    fn sadd_sync(&self, key: &str, members: &[String]) -> KvResult<u64> {
        self.reap(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Stored::Set(HashSet::new()),
                expires_at: None,
            });
        match &mut entry.value {
            Stored::Set(set) => {
                let mut added = 0;
                for member in members {
                    if set.insert(member.clone()) {
                        added += 1;
                    }
                }
                Ok(added)
            }
            _ => Err(KvError::Command(format!("WRONGTYPE key {} is not a set", key))),
        }
    }

    fn srem_sync(&self, key: &str, members: &[String]) {
        if !self.reap(key) {
            return;
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Stored::Set(set) = &mut entry.value {
                for member in members {
                    set.remove(member);
                }
            }
        }
    }

    fn incrby_sync(&self, key: &str, delta: i64) -> KvResult<i64> {
        self.reap(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Stored::Str("0".to_string()),
                expires_at: None,
            });
        match &mut entry.value {
            Stored::Str(s) => {
                let current: i64 = s
                    .parse()
                    .map_err(|_| KvError::Command(format!("key {} is not an integer", key)))?;
                let next = current + delta;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(KvError::Command(format!("WRONGTYPE key {} is not a string", key))),
        }
    }

    fn expire_sync(&self, key: &str, ttl_secs: u64) -> bool {
        if !self.reap(key) {
            return false;
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check_online()?;
        if !self.reap(key) {
            return Ok(None);
        }
        match self.entries.get(key).map(|e| e.value.clone()) {
            Some(Stored::Str(s)) => Ok(Some(s)),
            Some(_) => Err(KvError::Command(format!("WRONGTYPE key {} is not a string", key))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.check_online()?;
        self.put(key, Stored::Str(value.to_string()), None);
        Ok(())
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> KvResult<()> {
        self.check_online()?;
        self.put(key, Stored::Str(value.to_string()), Some(ttl_secs));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        self.check_online()?;
        let mut removed = 0;
        for key in keys {
            if self.reap(key) && self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.check_online()?;
        Ok(self.reap(key))
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        self.check_online()?;
        if !self.reap(key) {
            return Ok(-2);
        }
        match self.entries.get(key).and_then(|e| e.expires_at) {
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                Ok(remaining.as_secs() as i64)
            }
            None => Ok(-1),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> KvResult<()> {
        self.check_online()?;
        self.hset_sync(key, fields)
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.check_online()?;
        if !self.reap(key) {
            return Ok(None);
        }
        match self.entries.get(key).map(|e| e.value.clone()) {
            Some(Stored::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(KvError::Command(format!("WRONGTYPE key {} is not a hash", key))),
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.check_online()?;
        if !self.reap(key) {
            return Ok(HashMap::new());
        }
        match self.entries.get(key).map(|e| e.value.clone()) {
            Some(Stored::Hash(map)) => Ok(map),
            Some(_) => Err(KvError::Command(format!("WRONGTYPE key {} is not a hash", key))),
            None => Ok(HashMap::new()),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.check_online()?;
        self.hincrby_sync(key, field, delta)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> KvResult<u64> {
        self.check_online()?;
        self.sadd_sync(key, members)
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        self.check_online()?;
        if !self.reap(key) {
            return Ok(Vec::new());
        }
        match self.entries.get(key).map(|e| e.value.clone()) {
            Some(Stored::Set(set)) => Ok(set.into_iter().collect()),
            Some(_) => Err(KvError::Command(format!("WRONGTYPE key {} is not a set", key))),
            None => Ok(Vec::new()),
        }
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        self.check_online()?;
        self.incrby_sync(key, 1)
    }

    async fn incrby(&self, key: &str, delta: i64) -> KvResult<i64> {
        self.check_online()?;
        self.incrby_sync(key, delta)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        self.check_online()?;
        Ok(self.expire_sync(key, ttl_secs))
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)> {
        self.check_online()?;
        let regex = glob_to_regex(pattern)
            .map_err(|e| KvError::Command(format!("invalid scan pattern: {}", e)))?;

        // Cursor emulation: a stable sorted snapshot of matching live keys,
        // with the cursor as an index into it.
        let mut matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired() && regex.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matching.sort();

        let start = cursor as usize;
        if start >= matching.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(matching.len());
        let chunk = matching[start..end].to_vec();
        let next = if end >= matching.len() { 0 } else { end as u64 };
        Ok((next, chunk))
    }

    async fn batch(&self, commands: &[KvCommand]) -> KvResult<BatchOutcome> {
        self.check_online()?;

        let fail_after = self.fail_batch_after.lock().take();
        for (i, command) in commands.iter().enumerate() {
            if let Some(limit) = fail_after {
                if i >= limit {
                    return Err(KvError::Batch {
                        committed: i,
                        total: commands.len(),
                        message: "injected batch fault".into(),
                    });
                }
            }
            self.apply(command).map_err(|e| KvError::Batch {
                committed: i,
                total: commands.len(),
                message: e.to_string(),
            })?;
        }
        Ok(BatchOutcome {
            committed: commands.len(),
        })
    }
}
