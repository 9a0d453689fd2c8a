//! Tier engine
//!
//! Orchestrates the GET walk (L1 session → L2 exact → L3 semantic) and the
//! pipelined SET. Failure semantics per tier:
//!
//! - KV read failure during GET is swallowed and treated as a miss for that
//!   tier, preserving availability.
//! - KV write failure during SET surfaces as a storage error after a
//!   best-effort compensating batch reverses whatever committed.
//! - Vector index failures never block L1/L2; they are logged and counted.
//!
//! Hit-side accounting (access counters, daily stats, tenant usage) and
//! semantic indexing are fire-and-forget: the engine enqueues jobs onto an
//! explicit work queue drained by one background worker, so deferred work
//! is structured rather than scattered across detached tasks. Failures are
//! logged, never surfaced; everything queued is `INCR`/`HSET`-shaped or an
//! upsert, idempotent on retry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::fingerprint::{self, CanonicalRequest, Fingerprint, Kind};
use crate::fingerprint::canonical::canonical_json;
use crate::keys;
use crate::kv::{KvCommand, KvError, KvStore};
use crate::observability::CounterRegistry;
use crate::vector::{Embedder, MetadataFilter, RecordMetadata, VectorIndex};

use super::metadata::EntryMetadata;
use super::session::SessionCache;
use super::{CacheHit, TierLevel};

/// A GET/CHECK request against the tier hierarchy
#[derive(Debug, Clone)]
pub struct LookupRequest {
    /// Canonical request identity
    pub request: CanonicalRequest,
    /// Resolved namespace
    pub namespace: String,
    /// Database name; required for db lookups (part of the entry key)
    pub db_name: Option<String>,
    /// Tenant digest for usage accounting; None for demo traffic
    pub tenant: Option<String>,
    /// Whether the caller opted into semantic (L3) lookup
    pub semantic: bool,
}

/// Lookup result
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// Served from a tier
    Hit(CacheHit),
    /// No tier had it
    Miss {
        /// The entry key that was probed, for diagnostics
        entry_key: String,
    },
}

impl LookupOutcome {
    /// Whether this is a hit
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// The probed or serving key
    pub fn entry_key(&self) -> &str {
        match self {
            Self::Hit(hit) => &hit.entry_key,
            Self::Miss { entry_key } => entry_key,
        }
    }
}

/// A SET request
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Canonical request identity
    pub request: CanonicalRequest,
    /// Resolved namespace
    pub namespace: String,
    /// Opaque payload to store, exactly as supplied
    pub payload: String,
    /// TTL override; kind default applies when absent
    pub ttl_secs: Option<u64>,
    /// Tags for tag-scoped invalidation
    pub tags: Vec<String>,
    /// Database name; required for db entries
    pub db_name: Option<String>,
    /// Result row count (db entries)
    pub row_count: Option<u64>,
    /// Source URL for URL-scoped invalidation
    pub source_url: Option<String>,
    /// Tenant digest for usage accounting; None for demo traffic
    pub tenant: Option<String>,
}

/// Acknowledgement of a successful SET
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    /// The structured key the payload landed under
    pub entry_key: String,
    /// Effective TTL in seconds
    pub ttl_secs: u64,
}

/// Deferred work drained by the background worker
enum DeferredJob {
    /// Hit-side accounting for one served request
    HitAccounting {
        tier: TierLevel,
        kind: Kind,
        entry_key: String,
        tenant: Option<String>,
    },
    /// Daily miss counter bump plus the tenant's `gets` rollup
    MissAccounting {
        kind: Kind,
        tenant: Option<String>,
    },
    /// Embed and upsert one semantic record
    SemanticUpsert {
        id: String,
        text: String,
        record: RecordMetadata,
    },
}

/// The three-tier cache engine
pub struct TierEngine {
    kv: Arc<dyn KvStore>,
    vector: Option<Arc<dyn VectorIndex>>,
    session: Arc<SessionCache>,
    config: Arc<GatewayConfig>,
    counters: CounterRegistry,
    embedder: Arc<dyn Embedder>,
    deferred_tx: tokio::sync::mpsc::UnboundedSender<DeferredJob>,
}

impl TierEngine {
    /// Create an engine over the given drivers
    ///
    /// Spawns the deferred-work worker; it exits when the engine drops and
    /// the queue closes.
    pub fn new(
        kv: Arc<dyn KvStore>,
        vector: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        let session = Arc::new(SessionCache::new(&config.session));
        let counters = CounterRegistry::new();
        let (deferred_tx, deferred_rx) = tokio::sync::mpsc::unbounded_channel();

        let worker = DeferredWorker {
            kv: kv.clone(),
            vector: vector.clone(),
            embedder: embedder.clone(),
            counters: counters.clone(),
            counter_ttl_secs: config.analytics.counter_ttl_secs,
        };
        tokio::spawn(worker.run(deferred_rx));

        Self {
            kv,
            vector,
            session,
            config,
            counters,
            embedder,
            deferred_tx,
        }
    }

    /// The L1 session cache; shared with the invalidation engine so sweeps
    /// can purge session residents
    pub fn session(&self) -> Arc<SessionCache> {
        self.session.clone()
    }

    /// Process-local counter snapshot
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Walk the tiers for a cached artifact
    pub async fn lookup(&self, req: &LookupRequest) -> GatewayResult<LookupOutcome> {
        let fp = fingerprint::fingerprint(&req.request)?;
        let entry_key = self.entry_key(&req.request, &req.namespace, req.db_name.as_deref(), &fp)?;

        // L1 session
        if let Some(payload) = self.session.get(&entry_key) {
            self.counters.incr("hits.l1");
            self.spawn_hit_accounting(TierLevel::L1, fp.kind, entry_key.clone(), req.tenant.clone());
            return Ok(LookupOutcome::Hit(CacheHit {
                tier: TierLevel::L1,
                parsed: serde_json::from_str(&payload).ok(),
                payload,
                metadata: None,
                entry_key,
                similarity: None,
            }));
        }

        // L2 exact: payload and metadata fetched in parallel; the metadata
        // leg is best-effort
        let meta_key = keys::meta(&entry_key);
        let (payload_res, meta_res) =
            tokio::join!(self.kv.get(&entry_key), self.kv.hgetall(&meta_key));
        match payload_res {
            Ok(Some(payload)) => {
                let metadata = match meta_res {
                    Ok(fields) if !fields.is_empty() => Some(EntryMetadata::from_fields(&fields)),
                    Ok(_) => None,
                    Err(err) => {
                        debug!(error = %err, key = %meta_key, "metadata fetch failed on hit");
                        None
                    }
                };

                // Session residency so follow-up lookups stay in-process;
                // clamped to the entry's remaining lifetime
                self.session
                    .put(&entry_key, &payload, remaining_ttl_secs(metadata.as_ref()));

                self.counters.incr("hits.l2");
                self.spawn_hit_accounting(
                    TierLevel::L2,
                    fp.kind,
                    entry_key.clone(),
                    req.tenant.clone(),
                );
                return Ok(LookupOutcome::Hit(CacheHit {
                    tier: TierLevel::L2,
                    parsed: serde_json::from_str(&payload).ok(),
                    payload,
                    metadata,
                    entry_key,
                    similarity: None,
                }));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, key = %entry_key, "l2 read failed, treating as miss");
                self.counters.incr("errors.l2_read");
            }
        }

        // L3 semantic
        if fp.kind == Kind::Llm && req.semantic && self.config.semantic.enabled {
            if let Some(hit) = self.semantic_lookup(req).await {
                return Ok(LookupOutcome::Hit(hit));
            }
        }

        self.counters.incr("misses");
        self.spawn_miss_accounting(fp.kind, req.tenant.clone());
        Ok(LookupOutcome::Miss { entry_key })
    }

    /// Store an artifact: one pipelined batch for L2, metadata, indices,
    /// and counters; an async upsert for L3
    pub async fn store(&self, req: &StoreRequest) -> GatewayResult<StoreReceipt> {
        let fp = fingerprint::fingerprint(&req.request)?;
        let ttl_secs = req
            .ttl_secs
            .unwrap_or_else(|| self.config.ttl.for_kind(fp.kind));
        if ttl_secs == 0 {
            return Err(GatewayError::InvalidInput("ttl must be positive".into()));
        }

        let entry_key = self.entry_key(&req.request, &req.namespace, req.db_name.as_deref(), &fp)?;
        let meta_key = keys::meta(&entry_key);

        let mut metadata = EntryMetadata::for_new_entry(ttl_secs);
        metadata.row_count = req.row_count;
        metadata.source_url = req.source_url.clone();
        match &req.request {
            CanonicalRequest::Tool { version, .. } => {
                metadata.version = Some(effective_tool_version(version).to_string());
            }
            CanonicalRequest::Db { schema_version, .. } => {
                metadata.schema_version = schema_version.clone();
            }
            CanonicalRequest::Llm { .. } => {}
        }

        let commands = self.build_store_batch(req, &fp, &entry_key, &meta_key, &metadata, ttl_secs);

        match self.kv.batch(&commands).await {
            Ok(_) => {}
            Err(KvError::Batch { committed, message, .. }) => {
                self.compensate(&commands[..committed]).await;
                return Err(GatewayError::Storage(format!(
                    "cache write failed: {}",
                    message
                )));
            }
            Err(err) => return Err(err.into()),
        }

        if fp.kind == Kind::Llm && self.config.semantic.enabled {
            self.spawn_semantic_upsert(req, &fp);
        }

        self.counters.incr("sets");
        Ok(StoreReceipt {
            entry_key,
            ttl_secs,
        })
    }

    /// Resolve the structured entry key for a request
    fn entry_key(
        &self,
        request: &CanonicalRequest,
        namespace: &str,
        db_name: Option<&str>,
        fp: &Fingerprint,
    ) -> GatewayResult<String> {
        match request {
            CanonicalRequest::Llm { provider, model, .. } => {
                Ok(keys::llm_entry(namespace, provider, model, &fp.digest))
            }
            CanonicalRequest::Tool { tool_name, version, .. } => Ok(keys::tool_entry(
                effective_tool_version(version),
                namespace,
                tool_name,
                &fp.digest,
            )),
            CanonicalRequest::Db { .. } => {
                let db = db_name.ok_or_else(|| {
                    GatewayError::InvalidInput("db: db_name is required".into())
                })?;
                Ok(keys::db_entry(namespace, db, &fp.digest))
            }
        }
    }

    fn build_store_batch(
        &self,
        req: &StoreRequest,
        fp: &Fingerprint,
        entry_key: &str,
        meta_key: &str,
        metadata: &EntryMetadata,
        ttl_secs: u64,
    ) -> Vec<KvCommand> {
        let index_ttl = ttl_secs + self.config.index_grace_secs;
        let counter_ttl = self.config.analytics.counter_ttl_secs;
        let date = keys::today();

        let mut commands = vec![
            KvCommand::SetEx {
                key: entry_key.to_string(),
                ttl_secs,
                value: req.payload.clone(),
            },
            KvCommand::HSet {
                key: meta_key.to_string(),
                fields: metadata.to_fields(),
            },
            KvCommand::Expire {
                key: meta_key.to_string(),
                ttl_secs,
            },
        ];

        for tag in &req.tags {
            let tag_key = keys::tag_index(&req.namespace, tag);
            commands.push(KvCommand::SAdd {
                key: tag_key.clone(),
                members: vec![entry_key.to_string()],
            });
            commands.push(KvCommand::Expire {
                key: tag_key,
                ttl_secs: index_ttl,
            });
        }

        if let (Some(db), Some(schema)) = (req.db_name.as_deref(), metadata.schema_version.as_deref())
        {
            let schema_key = keys::schema_index(&req.namespace, db, schema);
            commands.push(KvCommand::SAdd {
                key: schema_key.clone(),
                members: vec![entry_key.to_string()],
            });
            commands.push(KvCommand::Expire {
                key: schema_key,
                ttl_secs: index_ttl,
            });
        }

        let sets_counter = keys::daily_kind_stat(fp.kind.as_str(), "sets", &date);
        commands.push(KvCommand::Incr {
            key: sets_counter.clone(),
        });
        commands.push(KvCommand::Expire {
            key: sets_counter,
            ttl_secs: counter_ttl,
        });

        if let Some(digest) = &req.tenant {
            commands.push(KvCommand::HIncrBy {
                key: keys::tenant_usage(digest, fp.kind.as_str()),
                field: "sets".to_string(),
                delta: 1,
            });
        }

        commands
    }

    /// Reverse the committed prefix of a failed store batch
    ///
    /// Entry and metadata writes become deletes; index membership becomes a
    /// set removal. Counter bumps are left alone: analytics is eventually
    /// consistent and tolerates an orphan increment.
    async fn compensate(&self, committed: &[KvCommand]) {
        let mut reversal: Vec<KvCommand> = Vec::new();
        for command in committed {
            match command {
                KvCommand::Set { key, .. }
                | KvCommand::SetEx { key, .. }
                | KvCommand::HSet { key, .. } => reversal.push(KvCommand::Del {
                    keys: vec![key.clone()],
                }),
                KvCommand::SAdd { key, members } => reversal.push(KvCommand::SRem {
                    key: key.clone(),
                    members: members.clone(),
                }),
                _ => {}
            }
        }
        if reversal.is_empty() {
            return;
        }
        if let Err(err) = self.kv.batch(&reversal).await {
            warn!(error = %err, "compensating delete failed; ttl will reconcile");
            self.counters.incr("errors.compensation");
        }
    }

    async fn semantic_lookup(&self, req: &LookupRequest) -> Option<CacheHit> {
        let (provider, model) = match &req.request {
            CanonicalRequest::Llm { provider, model, .. } => (provider.clone(), model.clone()),
            _ => return None,
        };
        let index = self.vector.as_ref()?;
        let text = embedding_input(&req.request)?;

        let vector = match self.embedder.embed(&text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "embedding failed, skipping semantic tier");
                self.counters.incr("errors.embedding");
                return None;
            }
        };

        let filter = MetadataFilter {
            namespace: Some(req.namespace.clone()),
            provider: Some(provider),
            model: Some(model),
        };
        let matches = match index
            .query(&vector, self.config.semantic.top_k, &filter)
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!(error = %err, "vector query failed, skipping semantic tier");
                self.counters.incr("errors.vector");
                return None;
            }
        };

        // Results arrive best-first with recency tie-breaks; take the first
        // at or above the threshold
        let threshold = self.config.semantic.threshold;
        let best = matches.into_iter().find(|m| m.score >= threshold)?;

        self.counters.incr("hits.l3");
        self.spawn_hit_accounting(TierLevel::L3, Kind::Llm, best.id.clone(), req.tenant.clone());
        Some(CacheHit {
            tier: TierLevel::L3,
            parsed: serde_json::from_str(&best.metadata.response).ok(),
            payload: best.metadata.response.clone(),
            metadata: None,
            entry_key: best.id,
            similarity: Some(best.score),
        })
    }

    fn spawn_semantic_upsert(&self, req: &StoreRequest, fp: &Fingerprint) {
        if self.vector.is_none() {
            return;
        }
        let (provider, model) = match &req.request {
            CanonicalRequest::Llm { provider, model, .. } => (provider.clone(), model.clone()),
            _ => return,
        };
        let text = match embedding_input(&req.request) {
            Some(text) => text,
            None => return,
        };

        let id = keys::semantic_record(&req.namespace, &provider, &model, &fp.digest);
        let record = RecordMetadata {
            response: req.payload.clone(),
            cached_at_ms: Utc::now().timestamp_millis(),
            ttl_secs: self.config.semantic.record_ttl_secs,
            namespace: req.namespace.clone(),
            provider,
            model,
        };
        self.defer(DeferredJob::SemanticUpsert { id, text, record });
    }

    fn spawn_hit_accounting(
        &self,
        tier: TierLevel,
        kind: Kind,
        entry_key: String,
        tenant: Option<String>,
    ) {
        self.defer(DeferredJob::HitAccounting {
            tier,
            kind,
            entry_key,
            tenant,
        });
    }

    fn spawn_miss_accounting(&self, kind: Kind, tenant: Option<String>) {
        self.defer(DeferredJob::MissAccounting { kind, tenant });
    }

    fn defer(&self, job: DeferredJob) {
        if self.deferred_tx.send(job).is_err() {
            // Worker gone (engine tearing down); deferred work is lossy by
            // contract
            self.counters.incr("errors.deferred_dropped");
        }
    }
}

/// Drains the deferred-work queue
struct DeferredWorker {
    kv: Arc<dyn KvStore>,
    vector: Option<Arc<dyn VectorIndex>>,
    embedder: Arc<dyn Embedder>,
    counters: CounterRegistry,
    counter_ttl_secs: u64,
}

impl DeferredWorker {
    async fn run(self, mut rx: tokio::sync::mpsc::UnboundedReceiver<DeferredJob>) {
        while let Some(job) = rx.recv().await {
            match job {
                DeferredJob::HitAccounting {
                    tier,
                    kind,
                    entry_key,
                    tenant,
                } => self.hit_accounting(tier, kind, &entry_key, tenant).await,
                DeferredJob::MissAccounting { kind, tenant } => {
                    bump_daily(
                        self.kv.as_ref(),
                        &keys::daily_misses(&keys::today()),
                        self.counter_ttl_secs,
                    )
                    .await;
                    if let Some(digest) = tenant {
                        self.bump_tenant_usage(&digest, kind, &["gets"]).await;
                    }
                }
                DeferredJob::SemanticUpsert { id, text, record } => {
                    self.semantic_upsert(&id, &text, record).await;
                }
            }
        }
    }

    async fn hit_accounting(
        &self,
        tier: TierLevel,
        kind: Kind,
        entry_key: &str,
        tenant: Option<String>,
    ) {
        let date = keys::today();

        // L3 record ids have no sibling metadata hash
        if tier != TierLevel::L3 {
            let meta_key = keys::meta(entry_key);
            let now_ms = Utc::now().timestamp_millis();
            if let Err(err) = self.kv.hincrby(&meta_key, "access_count", 1).await {
                debug!(error = %err, "access count update failed");
            }
            if let Err(err) = self
                .kv
                .hset(&meta_key, &[("last_accessed".to_string(), now_ms.to_string())])
                .await
            {
                debug!(error = %err, "last accessed update failed");
            }
        }

        bump_daily(
            self.kv.as_ref(),
            &keys::daily_hits(tier.as_str(), &date),
            self.counter_ttl_secs,
        )
        .await;
        if kind != Kind::Llm {
            bump_daily(
                self.kv.as_ref(),
                &keys::daily_kind_stat(kind.as_str(), "hits", &date),
                self.counter_ttl_secs,
            )
            .await;
        }
        if let Some(digest) = tenant {
            // Every served GET counts once as a get; hits additionally
            self.bump_tenant_usage(&digest, kind, &["gets", "hits"]).await;
        }
    }

    async fn bump_tenant_usage(&self, digest: &str, kind: Kind, fields: &[&str]) {
        let usage_key = keys::tenant_usage(digest, kind.as_str());
        for field in fields {
            if let Err(err) = self.kv.hincrby(&usage_key, field, 1).await {
                debug!(error = %err, field = %field, "tenant usage update failed");
            }
        }
    }

    async fn semantic_upsert(&self, id: &str, text: &str, record: RecordMetadata) {
        let index = match &self.vector {
            Some(index) => index,
            None => return,
        };
        let vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, id = %id, "embedding failed, semantic record skipped");
                self.counters.incr("errors.embedding");
                return;
            }
        };
        if let Err(err) = index.upsert(id, vector, record).await {
            warn!(error = %err, id = %id, "semantic upsert failed");
            self.counters.incr("errors.semantic_upsert");
        }
    }
}

/// Increment a daily counter, bounding its lifetime on first touch
async fn bump_daily(kv: &dyn KvStore, key: &str, ttl_secs: u64) {
    match kv.incr(key).await {
        Ok(1) => {
            if let Err(err) = kv.expire(key, ttl_secs).await {
                debug!(error = %err, key = %key, "counter ttl failed");
            }
        }
        Ok(_) => {}
        Err(err) => debug!(error = %err, key = %key, "counter bump failed"),
    }
}

/// Remaining entry lifetime from its metadata, for session residency
fn remaining_ttl_secs(metadata: Option<&EntryMetadata>) -> u64 {
    let Some(meta) = metadata else {
        // Without metadata, let the session TTL clamp on its own
        return u64::MAX;
    };
    let now_ms = Utc::now().timestamp_millis();
    let deadline_ms = meta.cached_at_ms + (meta.ttl_secs as i64) * 1000;
    ((deadline_ms - now_ms).max(0) / 1000) as u64
}

/// Tool version label with the default applied
fn effective_tool_version(version: &str) -> &str {
    if version.is_empty() {
        "v1"
    } else {
        version
    }
}

/// Embedding input: concatenated message contents, falling back to the
/// canonical JSON of any message without a plain-text content field
fn embedding_input(request: &CanonicalRequest) -> Option<String> {
    match request {
        CanonicalRequest::Llm { messages, .. } => {
            if messages.is_empty() {
                return None;
            }
            let parts: Vec<String> = messages
                .iter()
                .map(|m| {
                    m.get("content")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| canonical_json(m))
                })
                .collect();
            Some(parts.join("\n"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use crate::vector::embedding::NGramEmbedder;
    use crate::vector::memory::MemoryVectorIndex;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: TierEngine,
        kv: Arc<MemoryKv>,
        vector: Arc<MemoryVectorIndex>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(GatewayConfig::default());
        let kv = Arc::new(MemoryKv::new());
        let vector = Arc::new(MemoryVectorIndex::new());
        let embedder = Arc::new(NGramEmbedder::new(config.semantic.embedding_dim));
        let engine = TierEngine::new(
            kv.clone(),
            Some(vector.clone()),
            embedder,
            config,
        );
        Fixture { engine, kv, vector }
    }

    fn llm_request(content: &str, temperature: f64) -> CanonicalRequest {
        CanonicalRequest::Llm {
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![json!({"role": "user", "content": content})],
            temperature: Some(temperature),
        }
    }

    fn store_req(request: CanonicalRequest, payload: &str) -> StoreRequest {
        StoreRequest {
            request,
            namespace: "default".into(),
            payload: payload.into(),
            ttl_secs: Some(60),
            tags: Vec::new(),
            db_name: None,
            row_count: None,
            source_url: None,
            tenant: None,
        }
    }

    fn lookup_req(request: CanonicalRequest) -> LookupRequest {
        LookupRequest {
            request,
            namespace: "default".into(),
            db_name: None,
            tenant: None,
            semantic: false,
        }
    }

    #[tokio::test]
    async fn test_set_then_get_hits_l2() {
        let f = fixture();
        f.engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap();

        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        match outcome {
            LookupOutcome::Hit(hit) => {
                assert_eq!(hit.tier, TierLevel::L2);
                assert_eq!(hit.payload, "hello");
            }
            LookupOutcome::Miss { .. } => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn test_second_get_hits_l1() {
        let f = fixture();
        f.engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap();

        f.engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        match outcome {
            LookupOutcome::Hit(hit) => assert_eq!(hit.tier, TierLevel::L1),
            LookupOutcome::Miss { .. } => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn test_temperature_drift_misses() {
        let f = fixture();
        f.engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap();

        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("hi", 0.8)))
            .await
            .unwrap();
        assert!(!outcome.is_hit());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let f = fixture();
        let mut set = store_req(llm_request("hi", 0.7), "hello");
        set.namespace = "acme".into();
        f.engine.store(&set).await.unwrap();

        let mut get = lookup_req(llm_request("hi", 0.7));
        get.namespace = "globex".into();
        assert!(!f.engine.lookup(&get).await.unwrap().is_hit());

        get.namespace = "acme".into();
        assert!(f.engine.lookup(&get).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_hit_accounting_updates_metadata() {
        let f = fixture();
        let receipt = f
            .engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap();

        f.engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        // Accounting is fire-and-forget; give it a beat
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fields = f.kv.hgetall(&keys::meta(&receipt.entry_key)).await.unwrap();
        let meta = EntryMetadata::from_fields(&fields);
        assert_eq!(meta.access_count, 2);
        assert!(meta.last_accessed_ms.is_some());

        let hits = f
            .kv
            .get(&keys::daily_hits("l2", &keys::today()))
            .await
            .unwrap();
        assert_eq!(hits.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_miss_counted() {
        let f = fixture();
        f.engine
            .lookup(&lookup_req(llm_request("nothing here", 0.1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let misses = f
            .kv
            .get(&keys::daily_misses(&keys::today()))
            .await
            .unwrap();
        assert_eq!(misses.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_semantic_hit_after_set() {
        let f = fixture();
        f.engine
            .store(&store_req(
                llm_request("what is photosynthesis?", 0.7),
                "light into sugar",
            ))
            .await
            .unwrap();
        // The semantic upsert is async
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.vector.live_len(), 1);

        let mut get = lookup_req(llm_request("explain photosynthesis", 0.7));
        get.semantic = true;
        let outcome = f.engine.lookup(&get).await.unwrap();
        match outcome {
            LookupOutcome::Hit(hit) => {
                assert_eq!(hit.tier, TierLevel::L3);
                assert_eq!(hit.payload, "light into sugar");
                assert!(hit.similarity.unwrap() >= 0.85);
            }
            LookupOutcome::Miss { .. } => panic!("expected semantic hit"),
        }
    }

    #[tokio::test]
    async fn test_semantic_below_threshold_misses() {
        let f = fixture();
        f.engine
            .store(&store_req(
                llm_request("what is photosynthesis?", 0.7),
                "light into sugar",
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut get = lookup_req(llm_request("how do I bake sourdough bread", 0.7));
        get.semantic = true;
        assert!(!f.engine.lookup(&get).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_semantic_respects_namespace() {
        let f = fixture();
        let mut set = store_req(llm_request("what is photosynthesis?", 0.7), "resp");
        set.namespace = "acme".into();
        f.engine.store(&set).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut get = lookup_req(llm_request("explain photosynthesis", 0.7));
        get.namespace = "globex".into();
        get.semantic = true;
        assert!(!f.engine.lookup(&get).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_db_requires_db_name() {
        let f = fixture();
        let request = CanonicalRequest::Db {
            query: "SELECT 1".into(),
            params: None,
            schema_version: None,
        };
        let err = f.engine.store(&store_req(request, "[]")).await.unwrap_err();
        assert_eq!(err.kind_str(), "invalid_input");
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let f = fixture();
        let mut set = store_req(llm_request("hi", 0.7), "hello");
        set.ttl_secs = Some(0);
        let err = f.engine.store(&set).await.unwrap_err();
        assert_eq!(err.kind_str(), "invalid_input");
    }

    #[tokio::test]
    async fn test_store_batch_failure_compensates() {
        let f = fixture();
        // Let the entry write commit, then fail the batch
        f.kv.fail_next_batch_after(1);
        let err = f
            .engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "storage_error");

        // Compensation removed the committed entry write
        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        assert!(!outcome.is_hit());
    }

    #[tokio::test]
    async fn test_kv_outage_reads_as_miss() {
        let f = fixture();
        f.engine
            .store(&store_req(llm_request("hi", 0.7), "hello"))
            .await
            .unwrap();
        f.kv.set_offline(true);
        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("hi", 0.7)))
            .await
            .unwrap();
        assert!(!outcome.is_hit());
        f.kv.set_offline(false);
    }

    #[tokio::test]
    async fn test_schema_index_written_for_db_sets() {
        let f = fixture();
        let request = CanonicalRequest::Db {
            query: "SELECT * FROM orders".into(),
            params: None,
            schema_version: Some("1".into()),
        };
        let mut set = store_req(request, "[{\"id\":1}]");
        set.namespace = "acme".into();
        set.db_name = Some("orders".into());
        set.row_count = Some(1);
        let receipt = f.engine.store(&set).await.unwrap();

        let members = f
            .kv
            .smembers(&keys::schema_index("acme", "orders", "1"))
            .await
            .unwrap();
        assert_eq!(members, vec![receipt.entry_key.clone()]);

        let fields = f.kv.hgetall(&keys::meta(&receipt.entry_key)).await.unwrap();
        let meta = EntryMetadata::from_fields(&fields);
        assert_eq!(meta.row_count, Some(1));
        assert_eq!(meta.schema_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_tags_indexed() {
        let f = fixture();
        let mut set = store_req(llm_request("hi", 0.7), "hello");
        set.tags = vec!["session-9".into(), "user-3".into()];
        let receipt = f.engine.store(&set).await.unwrap();

        for tag in ["session-9", "user-3"] {
            let members = f
                .kv
                .smembers(&keys::tag_index("default", tag))
                .await
                .unwrap();
            assert_eq!(members, vec![receipt.entry_key.clone()]);
        }
    }

    #[tokio::test]
    async fn test_tenant_usage_counts_gets_sets_hits() {
        let f = fixture();
        let digest = "cafebabe".to_string();

        let mut set = store_req(llm_request("hi", 0.7), "hello");
        set.tenant = Some(digest.clone());
        f.engine.store(&set).await.unwrap();

        let mut hit = lookup_req(llm_request("hi", 0.7));
        hit.tenant = Some(digest.clone());
        assert!(f.engine.lookup(&hit).await.unwrap().is_hit());

        let mut miss = lookup_req(llm_request("something else", 0.7));
        miss.tenant = Some(digest.clone());
        assert!(!f.engine.lookup(&miss).await.unwrap().is_hit());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let usage = f
            .kv
            .hgetall(&keys::tenant_usage(&digest, "llm"))
            .await
            .unwrap();
        assert_eq!(usage.get("sets").map(String::as_str), Some("1"));
        assert_eq!(usage.get("hits").map(String::as_str), Some("1"));
        // Both the hit and the miss count as served gets
        assert_eq!(usage.get("gets").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_unicode_payload_round_trip() {
        let f = fixture();
        let payload = "día soleado ☀️ 渋谷 \u{1F980}";
        f.engine
            .store(&store_req(llm_request("unicode?", 0.2), payload))
            .await
            .unwrap();
        let outcome = f
            .engine
            .lookup(&lookup_req(llm_request("unicode?", 0.2)))
            .await
            .unwrap();
        match outcome {
            LookupOutcome::Hit(hit) => assert_eq!(hit.payload, payload),
            LookupOutcome::Miss { .. } => panic!("expected hit"),
        }
    }
}
