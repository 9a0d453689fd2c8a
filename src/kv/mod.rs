//! Key-value store driver
//!
//! Thin abstraction over the external KV store the gateway persists to:
//! string ops with TTL, hash ops, set ops, atomic counters, cursor-based
//! SCAN, and a pipelined multi-command batch. Two drivers are provided:
//!
//! - [`memory::MemoryKv`]: in-process store with lazy TTL expiry, used by
//!   tests and the demo binary; supports fault injection.
//! - [`redis_store::RedisKv`]: production driver over a Redis connection
//!   manager; batches run under MULTI/EXEC.
//!
//! Batches either fully acknowledge or return an error capturing how many
//! commands committed, so callers can issue compensating deletes.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::GatewayError;

/// Result type for KV operations
pub type KvResult<T> = Result<T, KvError>;

/// KV driver errors
#[derive(Debug, Error)]
pub enum KvError {
    /// Store unreachable
    #[error("kv connection error: {0}")]
    Connection(String),

    /// A single command failed
    #[error("kv command error: {0}")]
    Command(String),

    /// A pipelined batch failed part-way through
    #[error("kv batch failed after {committed} of {total} commands: {message}")]
    Batch {
        /// Commands acknowledged before the failure
        committed: usize,
        /// Commands in the batch
        total: usize,
        /// Underlying failure
        message: String,
    },
}

impl From<KvError> for GatewayError {
    fn from(err: KvError) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

/// One command inside a pipelined batch
#[derive(Debug, Clone)]
pub enum KvCommand {
    /// `SET key value`
    Set {
        /// Target key
        key: String,
        /// Value to store
        value: String,
    },
    /// `SETEX key ttl value`
    SetEx {
        /// Target key
        key: String,
        /// Expiry in seconds
        ttl_secs: u64,
        /// Value to store
        value: String,
    },
    /// `DEL key [key ...]`
    Del {
        /// Keys to delete
        keys: Vec<String>,
    },
    /// `HSET key field value [field value ...]`
    HSet {
        /// Target hash key
        key: String,
        /// Field/value pairs
        fields: Vec<(String, String)>,
    },
    /// `HINCRBY key field delta`
    HIncrBy {
        /// Target hash key
        key: String,
        /// Field to increment
        field: String,
        /// Signed delta
        delta: i64,
    },
    /// `SADD key member [member ...]`
    SAdd {
        /// Target set key
        key: String,
        /// Members to add
        members: Vec<String>,
    },
    /// `SREM key member [member ...]`
    SRem {
        /// Target set key
        key: String,
        /// Members to remove
        members: Vec<String>,
    },
    /// `INCR key`
    Incr {
        /// Target counter key
        key: String,
    },
    /// `INCRBY key delta`
    IncrBy {
        /// Target counter key
        key: String,
        /// Signed delta
        delta: i64,
    },
    /// `EXPIRE key ttl`
    Expire {
        /// Target key
        key: String,
        /// Expiry in seconds
        ttl_secs: u64,
    },
}

impl KvCommand {
    /// Keys this command writes; used for compensating deletes
    pub fn touched_keys(&self) -> Vec<String> {
        match self {
            Self::Set { key, .. }
            | Self::SetEx { key, .. }
            | Self::HSet { key, .. }
            | Self::HIncrBy { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::Incr { key }
            | Self::IncrBy { key, .. }
            | Self::Expire { key, .. } => vec![key.clone()],
            Self::Del { keys } => keys.clone(),
        }
    }
}

/// Result of a successfully acknowledged batch
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    /// Commands acknowledged
    pub committed: usize,
}

/// Async KV store driver
///
/// TTL semantics follow the store: `ttl` returns `-2` for a missing key,
/// `-1` for a key with no expiry, otherwise remaining seconds.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// `SET key value` (no expiry)
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// `SETEX key ttl value`
    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> KvResult<()>;

    /// `DEL key [key ...]`; returns how many existed
    async fn del(&self, keys: &[String]) -> KvResult<u64>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// `TTL key` with store semantics (-2 missing, -1 no expiry)
    async fn ttl(&self, key: &str) -> KvResult<i64>;

    /// `HSET key field value [field value ...]`
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> KvResult<()>;

    /// `HGET key field`
    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>>;

    /// `HGETALL key`; empty map when the key is absent
    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>>;

    /// `HINCRBY key field delta`; returns the new value
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvResult<i64>;

    /// `SADD key member [member ...]`; returns newly added count
    async fn sadd(&self, key: &str, members: &[String]) -> KvResult<u64>;

    /// `SMEMBERS key`
    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    /// `INCR key`; returns the new value
    async fn incr(&self, key: &str) -> KvResult<i64>;

    /// `INCRBY key delta`; returns the new value
    async fn incrby(&self, key: &str, delta: i64) -> KvResult<i64>;

    /// `EXPIRE key ttl`; returns whether the key existed
    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool>;

    /// Cursor-based `SCAN` with a glob pattern and COUNT hint
    ///
    /// Returns the next cursor (0 when the iteration is complete) and a
    /// chunk of matching keys.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)>;

    /// Dispatch a pipelined batch
    ///
    /// Implementations must either acknowledge the whole batch or fail with
    /// [`KvError::Batch`] reporting how many commands committed.
    async fn batch(&self, commands: &[KvCommand]) -> KvResult<BatchOutcome>;
}

/// Convert a glob pattern (`*`, `?`) into an anchored regex
///
/// Shared by the memory driver's SCAN and the invalidation engine's match
/// accounting.
pub fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".");
    regex::Regex::new(&format!("^{}$", escaped))
}
