//! Redis KV driver
//!
//! Production driver over `redis::aio::ConnectionManager`, which reconnects
//! transparently and is cheap to clone per operation. Batches run under
//! MULTI/EXEC, so a failed batch commits nothing and the reported committed
//! count is zero.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{BatchOutcome, KvCommand, KvError, KvResult, KvStore};

/// Redis-backed KV store
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect to a Redis server, e.g. `redis://localhost:6379`
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }

    /// Wrap an existing connection manager
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn command_err(e: redis::RedisError) -> KvError {
    if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        KvError::Connection(e.to_string())
    } else {
        KvError::Command(e.to_string())
    }
}

/// Append one batch command to a pipeline
fn push_command(pipe: &mut redis::Pipeline, command: &KvCommand) {
    match command {
        KvCommand::Set { key, value } => {
            pipe.cmd("SET").arg(key).arg(value).ignore();
        }
        KvCommand::SetEx { key, ttl_secs, value } => {
            pipe.cmd("SETEX").arg(key).arg(*ttl_secs).arg(value).ignore();
        }
        KvCommand::Del { keys } => {
            pipe.cmd("DEL").arg(keys.as_slice()).ignore();
        }
        KvCommand::HSet { key, fields } => {
            let cmd = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value);
            }
            cmd.ignore();
        }
        KvCommand::HIncrBy { key, field, delta } => {
            pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta).ignore();
        }
        KvCommand::SAdd { key, members } => {
            pipe.cmd("SADD").arg(key).arg(members.as_slice()).ignore();
        }
        KvCommand::SRem { key, members } => {
            pipe.cmd("SREM").arg(key).arg(members.as_slice()).ignore();
        }
        KvCommand::Incr { key } => {
            pipe.cmd("INCR").arg(key).ignore();
        }
        KvCommand::IncrBy { key, delta } => {
            pipe.cmd("INCRBY").arg(key).arg(*delta).ignore();
        }
        KvCommand::Expire { key, ttl_secs } => {
            pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs).ignore();
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn();
        redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> KvResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let mut conn = self.conn();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.conn();
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> KvResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn incrby(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.conn();
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        let mut conn = self.conn();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> KvResult<(u64, Vec<String>)> {
        let mut conn = self.conn();
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn batch(&self, commands: &[KvCommand]) -> KvResult<BatchOutcome> {
        if commands.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            push_command(&mut pipe, command);
        }
        let mut conn = self.conn();
        // MULTI/EXEC: the batch commits as a unit or not at all
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| KvError::Batch {
                committed: 0,
                total: commands.len(),
                message: e.to_string(),
            })?;
        Ok(BatchOutcome {
            committed: commands.len(),
        })
    }
}
