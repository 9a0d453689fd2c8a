//! AgentCache demo driver
//!
//! Wires a gateway over in-memory drivers, provisions a live key, and
//! exercises one set/get/semantic-get/invalidate cycle with tracing
//! output. Production deployments embed [`agentcache::CacheGateway`] behind
//! their own transport and point the KV driver at Redis
//! (`agentcache::kv::redis_store::RedisKv::connect`).

use std::sync::Arc;

use serde_json::json;

use agentcache::auth::{RequestHeaders, Tier};
use agentcache::handlers::{InvalidateRequest, LlmGetRequest, LlmSetRequest};
use agentcache::kv::memory::MemoryKv;
use agentcache::observability;
use agentcache::vector::embedding::NGramEmbedder;
use agentcache::vector::memory::MemoryVectorIndex;
use agentcache::{CacheGateway, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    tracing::info!("AgentCache {} demo starting", agentcache::VERSION);

    let config = GatewayConfig::default();
    let kv = Arc::new(MemoryKv::new());
    let vector = Arc::new(MemoryVectorIndex::new());
    let embedder = Arc::new(NGramEmbedder::new(config.semantic.embedding_dim));
    let gateway = CacheGateway::new(kv, Some(vector), embedder, config);

    let key = "ac_live_demo_0001";
    gateway
        .provision_live_key(key, "demo@agentcache.dev", Tier::Pro, 100_000)
        .await?;
    let headers = RequestHeaders::with_key(key);

    // Cache a completion
    let stored = gateway
        .llm_set(
            &headers,
            LlmSetRequest {
                provider: "openai".into(),
                model: "gpt-4".into(),
                messages: vec![json!({"role": "user", "content": "what is photosynthesis?"})],
                temperature: Some(0.7),
                response: json!("Photosynthesis converts light into chemical energy."),
                ttl: Some(3600),
                tags: vec!["biology".into()],
                source_url: None,
            },
        )
        .await?;
    tracing::info!(ttl = stored.ttl, key = %stored.cache_key, "stored completion");

    // Exact hit
    let read = gateway
        .llm_get(
            &headers,
            LlmGetRequest {
                provider: "openai".into(),
                model: "gpt-4".into(),
                messages: vec![json!({"role": "user", "content": "what is photosynthesis?"})],
                temperature: Some(0.7),
                action: None,
            },
        )
        .await?;
    tracing::info!(hit = read.hit, tier = ?read.tier, latency_ms = read.latency_ms, "exact lookup");

    // Semantic hit on a paraphrase (the upsert is async; give it a beat)
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let semantic = gateway
        .llm_get(
            &headers,
            LlmGetRequest {
                provider: "openai".into(),
                model: "gpt-4".into(),
                messages: vec![json!({"role": "user", "content": "explain photosynthesis"})],
                temperature: Some(0.7),
                action: Some("search".into()),
            },
        )
        .await?;
    tracing::info!(
        hit = semantic.hit,
        tier = ?semantic.tier,
        similarity = ?semantic.similarity,
        "semantic lookup"
    );

    // Tag invalidation
    let invalidated = gateway
        .invalidate(
            &headers,
            InvalidateRequest {
                tags: vec!["biology".into()],
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(
        invalidated = invalidated.invalidated,
        scope = %invalidated.scope,
        "invalidation"
    );

    let stats = gateway.stats();
    tracing::info!(?stats, "final gateway stats");

    Ok(())
}
