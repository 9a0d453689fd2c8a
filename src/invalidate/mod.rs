//! Invalidation engine
//!
//! Targeted cache eviction with bounded work. Five scopes: exact key,
//! wildcard pattern, tag union, schema version, and namespace-wide (which
//! requires an explicit confirm flag). Every sweep is capped twice, by
//! keys touched and by SCAN iterations, and deletes run in pipeline
//! batches so a broad scope cannot pin the store.
//!
//! Two modifiers narrow any scope: `older_than_ms` (entry age from its
//! metadata `cached_at`) and `url` (metadata `source_url` equality).
//!
//! Deleting an LLM entry also purges its shadow record from the vector
//! index (best-effort), so invalidated responses cannot resurface through
//! the semantic tier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::fingerprint::Kind;
use crate::keys;
use crate::kv::{KvCommand, KvStore};
use crate::observability::CounterRegistry;
use crate::tier::metadata::EntryMetadata;
use crate::tier::session::SessionCache;
use crate::vector::VectorIndex;

/// What to invalidate; exactly one primary mode per request
#[derive(Debug, Clone)]
pub enum InvalidationScope {
    /// One structured entry key
    ExactKey {
        /// The full entry key
        key: String,
    },
    /// Wildcard sweep within one kind's keyspace
    Pattern {
        /// Kind whose key prefix scopes the sweep
        kind: Kind,
        /// Caller pattern matched after the namespace segment
        pattern: String,
    },
    /// Union of tag sets
    Tags {
        /// Tags to resolve
        tags: Vec<String>,
    },
    /// One schema-version set
    SchemaVersion {
        /// Database name
        db_name: String,
        /// Schema version to clear
        schema_version: String,
    },
    /// Everything in the namespace; requires `confirm`
    Namespace {
        /// Explicit confirmation flag
        confirm: bool,
    },
}

/// An invalidation request
#[derive(Debug, Clone)]
pub struct InvalidationRequest {
    /// Resolved namespace
    pub namespace: String,
    /// Primary mode
    pub scope: InvalidationScope,
    /// Only touch entries at least this old
    pub older_than_ms: Option<i64>,
    /// Only touch entries whose metadata `source_url` matches
    pub url: Option<String>,
}

impl InvalidationRequest {
    fn has_modifiers(&self) -> bool {
        self.older_than_ms.is_some() || self.url.is_some()
    }
}

/// Outcome of an invalidation run
#[derive(Debug, Clone)]
pub struct InvalidationReport {
    /// Entries removed
    pub invalidated: u64,
    /// Human-readable scope descriptor
    pub scope: String,
    /// Wall time spent
    pub elapsed_ms: u64,
}

/// The invalidation engine
pub struct InvalidationEngine {
    kv: Arc<dyn KvStore>,
    session: Arc<SessionCache>,
    vector: Option<Arc<dyn VectorIndex>>,
    config: Arc<GatewayConfig>,
    counters: CounterRegistry,
}

impl InvalidationEngine {
    /// Create an engine sharing the tier engine's session cache and vector
    /// index
    pub fn new(
        kv: Arc<dyn KvStore>,
        session: Arc<SessionCache>,
        vector: Option<Arc<dyn VectorIndex>>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            kv,
            session,
            vector,
            config,
            counters: CounterRegistry::new(),
        }
    }

    /// Process-local counter snapshot
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Run one invalidation request
    pub async fn invalidate(&self, req: &InvalidationRequest) -> GatewayResult<InvalidationReport> {
        let started = Instant::now();

        let (invalidated, scope) = match &req.scope {
            InvalidationScope::ExactKey { key } => self.invalidate_exact(req, key).await?,
            InvalidationScope::Pattern { kind, pattern } => {
                self.invalidate_pattern(req, *kind, pattern).await?
            }
            InvalidationScope::Tags { tags } => self.invalidate_tags(req, tags).await?,
            InvalidationScope::SchemaVersion {
                db_name,
                schema_version,
            } => self.invalidate_schema(req, db_name, schema_version).await?,
            InvalidationScope::Namespace { confirm } => {
                if !confirm {
                    return Err(GatewayError::ScopeTooBroad(format!(
                        "namespace {} clear requires confirm",
                        req.namespace
                    )));
                }
                self.invalidate_namespace(req).await?
            }
        };

        if invalidated > 0 {
            let counter = keys::daily_invalidations(&keys::today());
            match self.kv.incrby(&counter, invalidated as i64).await {
                Ok(value) if value == invalidated as i64 => {
                    // First touch today: bound the counter's lifetime
                    if let Err(err) = self
                        .kv
                        .expire(&counter, self.config.analytics.counter_ttl_secs)
                        .await
                    {
                        debug!(error = %err, "invalidation counter ttl failed");
                    }
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "invalidation counter bump failed"),
            }
        }
        self.counters.add("invalidated", invalidated);

        Ok(InvalidationReport {
            invalidated,
            scope,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn invalidate_exact(
        &self,
        req: &InvalidationRequest,
        key: &str,
    ) -> GatewayResult<(u64, String)> {
        match keys::key_namespace(key) {
            Some(ns) if ns == req.namespace => {}
            _ => {
                return Err(GatewayError::Forbidden(format!(
                    "key is not in namespace {}",
                    req.namespace
                )))
            }
        }

        let survivors = self.apply_modifiers(req, vec![key.to_string()]).await?;
        let removed = if survivors.is_empty() {
            0
        } else {
            let removed = self
                .kv
                .del(&[key.to_string(), keys::meta(key)])
                .await
                .map_err(GatewayError::from)?;
            self.session.remove(key);
            self.purge_semantic(&survivors).await;
            // DEL counts entry and meta separately; report entries
            u64::from(removed > 0)
        };
        Ok((removed, format!("key:{}", keys::suffix(key, 12))))
    }

    async fn invalidate_pattern(
        &self,
        req: &InvalidationRequest,
        kind: Kind,
        pattern: &str,
    ) -> GatewayResult<(u64, String)> {
        let full = scoped_pattern(kind, &req.namespace, pattern);
        let candidates = self
            .sweep(std::slice::from_ref(&full), self.config.scan.max_keys)
            .await?;
        let survivors = self.apply_modifiers(req, candidates).await?;
        let removed = self.delete_entries(&survivors).await?;
        Ok((removed, format!("pattern:{}", full)))
    }

    async fn invalidate_tags(
        &self,
        req: &InvalidationRequest,
        tags: &[String],
    ) -> GatewayResult<(u64, String)> {
        if tags.is_empty() {
            return Err(GatewayError::InvalidScope("tags list is empty".into()));
        }

        let mut members: HashSet<String> = HashSet::new();
        let tag_keys: Vec<String> = tags
            .iter()
            .map(|tag| keys::tag_index(&req.namespace, tag))
            .collect();
        'tags: for tag_key in &tag_keys {
            for member in self.kv.smembers(tag_key).await.map_err(GatewayError::from)? {
                if members.len() >= self.config.scan.max_keys {
                    break 'tags;
                }
                members.insert(member);
            }
        }

        let candidates: Vec<String> = members.into_iter().collect();
        let survivors = self.apply_modifiers(req, candidates).await?;
        let removed = self.delete_entries(&survivors).await?;

        // Consuming the index is only safe when nothing was filtered out;
        // a modifier run leaves the sets in place minus the deleted members
        if req.has_modifiers() {
            if !survivors.is_empty() {
                for tag_key in &tag_keys {
                    let commands = [KvCommand::SRem {
                        key: tag_key.clone(),
                        members: survivors.clone(),
                    }];
                    if let Err(err) = self.kv.batch(&commands).await {
                        warn!(error = %err, "tag membership cleanup failed");
                    }
                }
            }
        } else {
            self.kv.del(&tag_keys).await.map_err(GatewayError::from)?;
        }

        Ok((removed, format!("tags:{}", tags.len())))
    }

    async fn invalidate_schema(
        &self,
        req: &InvalidationRequest,
        db_name: &str,
        schema_version: &str,
    ) -> GatewayResult<(u64, String)> {
        let set_key = keys::schema_index(&req.namespace, db_name, schema_version);
        let mut candidates = self
            .kv
            .smembers(&set_key)
            .await
            .map_err(GatewayError::from)?;
        candidates.truncate(self.config.scan.max_keys);

        let survivors = self.apply_modifiers(req, candidates).await?;
        let removed = self.delete_entries(&survivors).await?;

        if req.has_modifiers() {
            if !survivors.is_empty() {
                let commands = [KvCommand::SRem {
                    key: set_key.clone(),
                    members: survivors,
                }];
                if let Err(err) = self.kv.batch(&commands).await {
                    warn!(error = %err, "schema membership cleanup failed");
                }
            }
        } else {
            self.kv
                .del(&[set_key])
                .await
                .map_err(GatewayError::from)?;
        }

        Ok((removed, format!("schema:{}:{}", db_name, schema_version)))
    }

    async fn invalidate_namespace(
        &self,
        req: &InvalidationRequest,
    ) -> GatewayResult<(u64, String)> {
        let patterns = keys::namespace_pattern(&req.namespace);
        let candidates = self
            .sweep(&patterns, self.config.scan.max_namespace_keys)
            .await?;
        let survivors = self.apply_modifiers(req, candidates).await?;
        let removed = self.delete_entries(&survivors).await?;
        // Session entries for this namespace are unreachable by key here;
        // dropping the whole session map is cheap and always correct
        self.session.clear();
        Ok((removed, format!("namespace:{}", req.namespace)))
    }

    /// Cursor sweep over one or more patterns, bounded by `key_cap` and the
    /// configured iteration cap (shared across patterns)
    async fn sweep(&self, patterns: &[String], key_cap: usize) -> GatewayResult<Vec<String>> {
        let count_hint = self.config.scan.scan_count_hint;
        let iter_cap = self.config.scan.iter_cap;
        let mut iterations = 0usize;
        let mut collected: Vec<String> = Vec::new();

        'patterns: for pattern in patterns {
            let mut cursor = 0u64;
            loop {
                if iterations >= iter_cap {
                    debug!(pattern = %pattern, "sweep stopped at iteration cap");
                    break 'patterns;
                }
                let (next, chunk) = self
                    .kv
                    .scan(pattern, cursor, count_hint)
                    .await
                    .map_err(GatewayError::from)?;
                iterations += 1;

                for key in chunk {
                    // Metadata keys ride along with their entries
                    if key.ends_with(keys::META_SUFFIX) {
                        continue;
                    }
                    collected.push(key);
                    if collected.len() >= key_cap {
                        break 'patterns;
                    }
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }

        Ok(collected)
    }

    /// Filter candidates through the age and URL modifiers
    async fn apply_modifiers(
        &self,
        req: &InvalidationRequest,
        candidates: Vec<String>,
    ) -> GatewayResult<Vec<String>> {
        if !req.has_modifiers() {
            return Ok(candidates);
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut survivors = Vec::with_capacity(candidates.len());

        for chunk in candidates.chunks(self.config.scan.delete_batch_size) {
            let meta_keys: Vec<String> = chunk.iter().map(|key| keys::meta(key)).collect();
            let fetches = meta_keys.iter().map(|meta_key| self.kv.hgetall(meta_key));
            let results = futures::future::join_all(fetches).await;

            for (key, fields) in chunk.iter().zip(results) {
                let fields = match fields {
                    Ok(fields) => fields,
                    Err(err) => {
                        debug!(error = %err, key = %key, "metadata fetch failed, skipping");
                        continue;
                    }
                };
                let metadata = EntryMetadata::from_fields(&fields);

                if let Some(older_than) = req.older_than_ms {
                    if metadata.age_ms(now_ms) < older_than {
                        continue;
                    }
                }
                if let Some(url) = &req.url {
                    if metadata.source_url.as_deref() != Some(url.as_str()) {
                        continue;
                    }
                }
                survivors.push(key.clone());
            }
        }

        Ok(survivors)
    }

    /// Delete entries and their metadata in pipeline batches
    async fn delete_entries(&self, entry_keys: &[String]) -> GatewayResult<u64> {
        let mut removed = 0u64;
        for chunk in entry_keys.chunks(self.config.scan.delete_batch_size) {
            let commands: Vec<KvCommand> = chunk
                .iter()
                .map(|key| KvCommand::Del {
                    keys: vec![key.clone(), keys::meta(key)],
                })
                .collect();
            self.kv.batch(&commands).await.map_err(GatewayError::from)?;
            for key in chunk {
                self.session.remove(key);
            }
            self.purge_semantic(chunk).await;
            removed += chunk.len() as u64;
        }
        Ok(removed)
    }

    /// Purge the semantic records shadowing deleted LLM entries
    ///
    /// Best-effort: a failed purge is logged and the record falls back to
    /// its own TTL.
    async fn purge_semantic(&self, entry_keys: &[String]) {
        let Some(index) = &self.vector else {
            return;
        };
        for key in entry_keys {
            if let Some(id) = keys::semantic_record_for_entry(key) {
                if let Err(err) = index.delete(&id).await {
                    debug!(error = %err, id = %id, "semantic purge failed");
                }
            }
        }
    }
}

/// Build the full sweep pattern for a kind under a namespace
///
/// The namespace segment is fixed by the engine, never by the caller, so a
/// pattern cannot cross tenants.
fn scoped_pattern(kind: Kind, namespace: &str, pattern: &str) -> String {
    match kind {
        Kind::Llm => format!("agentcache:v1:{}:{}", namespace, pattern),
        Kind::Tool => format!("agentcache:tool:*:{}:{}", namespace, pattern),
        Kind::Db => format!("agentcache:db:v1:{}:{}", namespace, pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionCacheConfig;
    use crate::kv::memory::MemoryKv;
    use crate::vector::memory::MemoryVectorIndex;
    use crate::vector::RecordMetadata;

    struct Fixture {
        engine: InvalidationEngine,
        kv: Arc<MemoryKv>,
        vector: Arc<MemoryVectorIndex>,
    }

    fn fixture() -> Fixture {
        fixture_with(GatewayConfig::default())
    }

    fn fixture_with(config: GatewayConfig) -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let session = Arc::new(SessionCache::new(&SessionCacheConfig::default()));
        let vector = Arc::new(MemoryVectorIndex::new());
        let engine =
            InvalidationEngine::new(kv.clone(), session, Some(vector.clone()), Arc::new(config));
        Fixture { engine, kv, vector }
    }

    async fn seed_entry(kv: &MemoryKv, key: &str, cached_at_ms: i64) {
        kv.setex(key, 600, "payload").await.unwrap();
        kv.hset(
            &keys::meta(key),
            &[
                ("cached_at".into(), cached_at_ms.to_string()),
                ("ttl".into(), "600".into()),
                ("access_count".into(), "1".into()),
            ],
        )
        .await
        .unwrap();
    }

    fn request(namespace: &str, scope: InvalidationScope) -> InvalidationRequest {
        InvalidationRequest {
            namespace: namespace.into(),
            scope,
            older_than_ms: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn test_exact_key() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "abc");
        seed_entry(&f.kv, &key, 0).await;

        let report = f
            .engine
            .invalidate(&request("acme", InvalidationScope::ExactKey { key: key.clone() }))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(!f.kv.exists(&key).await.unwrap());
        assert!(!f.kv.exists(&keys::meta(&key)).await.unwrap());
    }

    #[tokio::test]
    async fn test_exact_key_wrong_namespace_forbidden() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "abc");
        seed_entry(&f.kv, &key, 0).await;

        let err = f
            .engine
            .invalidate(&request("globex", InvalidationScope::ExactKey { key }))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "forbidden");
    }

    #[tokio::test]
    async fn test_exact_key_absent_is_zero() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "absent");
        let report = f
            .engine
            .invalidate(&request("acme", InvalidationScope::ExactKey { key }))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 0);
    }

    #[tokio::test]
    async fn test_pattern_scoped_to_namespace() {
        let f = fixture();
        for i in 0..3 {
            seed_entry(
                &f.kv,
                &keys::llm_entry("acme", "openai", "gpt-4", &format!("d{}", i)),
                0,
            )
            .await;
        }
        seed_entry(&f.kv, &keys::llm_entry("globex", "openai", "gpt-4", "dx"), 0).await;

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Pattern {
                    kind: Kind::Llm,
                    pattern: "openai:*".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 3);
        // The other tenant's entry is untouched
        assert!(f
            .kv
            .exists(&keys::llm_entry("globex", "openai", "gpt-4", "dx"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_pattern_honors_key_cap() {
        let mut config = GatewayConfig::default();
        config.scan.max_keys = 5;
        let f = fixture_with(config);
        for i in 0..12 {
            seed_entry(
                &f.kv,
                &keys::llm_entry("acme", "openai", "gpt-4", &format!("d{:02}", i)),
                0,
            )
            .await;
        }

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Pattern {
                    kind: Kind::Llm,
                    pattern: "*".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 5);
    }

    #[tokio::test]
    async fn test_tags_union_and_set_cleanup() {
        let f = fixture();
        let k1 = keys::llm_entry("acme", "openai", "gpt-4", "d1");
        let k2 = keys::llm_entry("acme", "openai", "gpt-4", "d2");
        seed_entry(&f.kv, &k1, 0).await;
        seed_entry(&f.kv, &k2, 0).await;
        f.kv.sadd(&keys::tag_index("acme", "user-1"), &[k1.clone()])
            .await
            .unwrap();
        f.kv.sadd(&keys::tag_index("acme", "session-2"), &[k1.clone(), k2.clone()])
            .await
            .unwrap();

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Tags {
                    tags: vec!["user-1".into(), "session-2".into()],
                },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 2);
        assert!(!f.kv.exists(&k1).await.unwrap());
        assert!(!f.kv.exists(&k2).await.unwrap());
        assert!(!f.kv.exists(&keys::tag_index("acme", "user-1")).await.unwrap());
        assert!(!f
            .kv
            .exists(&keys::tag_index("acme", "session-2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_empty_tags_invalid_scope() {
        let f = fixture();
        let err = f
            .engine
            .invalidate(&request("acme", InvalidationScope::Tags { tags: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_schema_version() {
        let f = fixture();
        let k1 = keys::db_entry("acme", "orders", "q1");
        let k2 = keys::db_entry("acme", "orders", "q2");
        seed_entry(&f.kv, &k1, 0).await;
        seed_entry(&f.kv, &k2, 0).await;
        f.kv.sadd(
            &keys::schema_index("acme", "orders", "1"),
            &[k1.clone(), k2.clone()],
        )
        .await
        .unwrap();

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::SchemaVersion {
                    db_name: "orders".into(),
                    schema_version: "1".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 2);
        assert!(!f.kv.exists(&k1).await.unwrap());
        assert!(!f
            .kv
            .exists(&keys::schema_index("acme", "orders", "1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_namespace_requires_confirm() {
        let f = fixture();
        let err = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Namespace { confirm: false },
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "scope_too_broad");
    }

    #[tokio::test]
    async fn test_namespace_clear_sweeps_all_kinds() {
        let f = fixture();
        seed_entry(&f.kv, &keys::llm_entry("acme", "openai", "gpt-4", "d1"), 0).await;
        seed_entry(&f.kv, &keys::tool_entry("v1", "acme", "weather", "d2"), 0).await;
        seed_entry(&f.kv, &keys::db_entry("acme", "orders", "d3"), 0).await;
        seed_entry(&f.kv, &keys::llm_entry("globex", "openai", "gpt-4", "dx"), 0).await;

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Namespace { confirm: true },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 3);
        assert!(f
            .kv
            .exists(&keys::llm_entry("globex", "openai", "gpt-4", "dx"))
            .await
            .unwrap());
        assert!(report.scope.contains("acme"));
    }

    #[tokio::test]
    async fn test_older_than_modifier() {
        let f = fixture();
        let now = Utc::now().timestamp_millis();
        let fresh = keys::llm_entry("acme", "openai", "gpt-4", "fresh");
        let stale = keys::llm_entry("acme", "openai", "gpt-4", "stale");
        seed_entry(&f.kv, &fresh, now).await;
        seed_entry(&f.kv, &stale, now - 60_000).await;

        let mut req = request(
            "acme",
            InvalidationScope::Pattern {
                kind: Kind::Llm,
                pattern: "*".into(),
            },
        );
        req.older_than_ms = Some(30_000);
        let report = f.engine.invalidate(&req).await.unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(f.kv.exists(&fresh).await.unwrap());
        assert!(!f.kv.exists(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_url_modifier() {
        let f = fixture();
        let with_url = keys::llm_entry("acme", "openai", "gpt-4", "u1");
        let without = keys::llm_entry("acme", "openai", "gpt-4", "u2");
        seed_entry(&f.kv, &with_url, 0).await;
        seed_entry(&f.kv, &without, 0).await;
        f.kv.hset(
            &keys::meta(&with_url),
            &[("source_url".into(), "https://example.test/doc".into())],
        )
        .await
        .unwrap();

        let mut req = request(
            "acme",
            InvalidationScope::Pattern {
                kind: Kind::Llm,
                pattern: "*".into(),
            },
        );
        req.url = Some("https://example.test/doc".into());
        let report = f.engine.invalidate(&req).await.unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(!f.kv.exists(&with_url).await.unwrap());
        assert!(f.kv.exists(&without).await.unwrap());
    }

    #[tokio::test]
    async fn test_tag_sets_survive_modifier_run() {
        let f = fixture();
        let now = Utc::now().timestamp_millis();
        let fresh = keys::llm_entry("acme", "openai", "gpt-4", "fresh");
        let stale = keys::llm_entry("acme", "openai", "gpt-4", "stale");
        seed_entry(&f.kv, &fresh, now).await;
        seed_entry(&f.kv, &stale, now - 60_000).await;
        let tag_key = keys::tag_index("acme", "batch-7");
        f.kv.sadd(&tag_key, &[fresh.clone(), stale.clone()]).await.unwrap();

        let mut req = request(
            "acme",
            InvalidationScope::Tags {
                tags: vec!["batch-7".into()],
            },
        );
        req.older_than_ms = Some(30_000);
        let report = f.engine.invalidate(&req).await.unwrap();
        assert_eq!(report.invalidated, 1);

        // The set still exists and still indexes the surviving entry
        let mut members = f.kv.smembers(&tag_key).await.unwrap();
        members.sort();
        assert_eq!(members, vec![fresh]);
    }

    #[tokio::test]
    async fn test_semantic_records_purged_with_entries() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "abc");
        seed_entry(&f.kv, &key, 0).await;
        f.vector
            .upsert(
                &keys::semantic_record("acme", "openai", "gpt-4", "abc"),
                vec![1.0, 0.0],
                RecordMetadata {
                    response: "resp".into(),
                    cached_at_ms: Utc::now().timestamp_millis(),
                    ttl_secs: 3600,
                    namespace: "acme".into(),
                    provider: "openai".into(),
                    model: "gpt-4".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(f.vector.live_len(), 1);

        let report = f
            .engine
            .invalidate(&request(
                "acme",
                InvalidationScope::Pattern {
                    kind: Kind::Llm,
                    pattern: "*".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(report.invalidated, 1);
        assert_eq!(f.vector.live_len(), 0);
    }

    #[tokio::test]
    async fn test_exact_key_purges_semantic_record() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "abc");
        seed_entry(&f.kv, &key, 0).await;
        f.vector
            .upsert(
                &keys::semantic_record("acme", "openai", "gpt-4", "abc"),
                vec![0.0, 1.0],
                RecordMetadata {
                    response: "resp".into(),
                    cached_at_ms: Utc::now().timestamp_millis(),
                    ttl_secs: 3600,
                    namespace: "acme".into(),
                    provider: "openai".into(),
                    model: "gpt-4".into(),
                },
            )
            .await
            .unwrap();

        f.engine
            .invalidate(&request("acme", InvalidationScope::ExactKey { key }))
            .await
            .unwrap();
        assert_eq!(f.vector.live_len(), 0);
    }

    #[tokio::test]
    async fn test_invalidation_counter_incremented() {
        let f = fixture();
        let key = keys::llm_entry("acme", "openai", "gpt-4", "abc");
        seed_entry(&f.kv, &key, 0).await;
        f.engine
            .invalidate(&request("acme", InvalidationScope::ExactKey { key }))
            .await
            .unwrap();
        let count = f
            .kv
            .get(&keys::daily_invalidations(&keys::today()))
            .await
            .unwrap();
        assert_eq!(count.as_deref(), Some("1"));
    }
}
