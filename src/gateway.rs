//! Cache gateway
//!
//! Ties the policy chain together. Every operation runs the same sequence:
//!
//! 1. rate limit (on the credential's digest, before any expensive work)
//! 2. authenticate (digest lookup for live keys)
//! 3. namespace resolution and quota check
//! 4. the tier engine / invalidation engine / analytics read
//! 5. accounting (quota consumption after successful work)
//!
//! Each operation runs under the ambient request deadline. Every request
//! gets a correlation id that rides on its span and on any error envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::analytics::{AnalyticsAggregator, AnalyticsSummary};
use crate::auth::{self, Authenticator, KeyKind, Principal, RequestHeaders, Tier};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::handlers::{
    AnalyticsRequest, CacheReadResponse, DbGetRequest, DbSetRequest, InvalidateRequest,
    LlmGetRequest, LlmSetRequest, StoreResponse, ToolGetRequest, ToolSetRequest,
};
use crate::handlers::responses::InvalidateResponse;
use crate::invalidate::InvalidationEngine;
use crate::kv::KvStore;
use crate::observability::{CorrelationId, CounterRegistry};
use crate::ratelimit::RateLimiter;
use crate::tier::TierEngine;
use crate::vector::{Embedder, VectorIndex};

/// Snapshot of the gateway's process-local metric surfaces
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    /// L1 session cache counters
    pub session: HashMap<String, u64>,
    /// Tier engine counters (hits, misses, errors)
    pub engine: HashMap<String, u64>,
    /// Invalidation engine counters
    pub invalidation: HashMap<String, u64>,
    /// Gateway-level counters (requests, denials)
    pub gateway: HashMap<String, u64>,
}

/// The multi-tenant cache gateway
pub struct CacheGateway {
    auth: Authenticator,
    limiter: RateLimiter,
    engine: Arc<TierEngine>,
    invalidator: InvalidationEngine,
    analytics: AnalyticsAggregator,
    config: Arc<GatewayConfig>,
    counters: CounterRegistry,
}

impl CacheGateway {
    /// Wire a gateway over the given drivers
    pub fn new(
        kv: Arc<dyn KvStore>,
        vector: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        config: GatewayConfig,
    ) -> Self {
        let config = Arc::new(config);
        let engine = Arc::new(TierEngine::new(
            kv.clone(),
            vector.clone(),
            embedder,
            config.clone(),
        ));
        let invalidator =
            InvalidationEngine::new(kv.clone(), engine.session(), vector, config.clone());
        let analytics = AnalyticsAggregator::new(kv.clone(), config.clone());
        let auth = Authenticator::new(kv.clone(), config.rate_limit.clone());
        let limiter = RateLimiter::new(kv, config.rate_limit.clone());

        Self {
            auth,
            limiter,
            engine,
            invalidator,
            analytics,
            config,
            counters: CounterRegistry::new(),
        }
    }

    /// The authenticator, for key provisioning in tests and tooling
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Provision a live key; convenience passthrough
    pub async fn provision_live_key(
        &self,
        key: &str,
        owner: &str,
        tier: Tier,
        monthly_quota: u64,
    ) -> GatewayResult<String> {
        self.auth.provision_live_key(key, owner, tier, monthly_quota).await
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// LLM GET/CHECK
    pub async fn llm_get(
        &self,
        headers: &RequestHeaders,
        request: LlmGetRequest,
    ) -> GatewayResult<CacheReadResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let lookup = request.into_lookup(namespace, principal.digest.clone());
            let outcome = self
                .with_deadline(self.engine.lookup(&lookup))
                .await?;
            self.limiter.record_usage(&principal).await?;
            Ok(CacheReadResponse::from_outcome(outcome, elapsed_ms(started)))
        }
        .await;
        self.finish("llm_get", &cid, result)
    }

    /// LLM SET
    pub async fn llm_set(
        &self,
        headers: &RequestHeaders,
        request: LlmSetRequest,
    ) -> GatewayResult<StoreResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let store = request.into_store(namespace, principal.digest.clone())?;
            let receipt = self.with_deadline(self.engine.store(&store)).await?;
            self.limiter.record_usage(&principal).await?;
            Ok(StoreResponse::from_receipt(receipt, elapsed_ms(started)))
        }
        .await;
        self.finish("llm_set", &cid, result)
    }

    /// Tool GET/CHECK
    pub async fn tool_get(
        &self,
        headers: &RequestHeaders,
        request: ToolGetRequest,
    ) -> GatewayResult<CacheReadResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let lookup = request.into_lookup(namespace, principal.digest.clone());
            let outcome = self.with_deadline(self.engine.lookup(&lookup)).await?;
            self.limiter.record_usage(&principal).await?;
            Ok(CacheReadResponse::from_outcome(outcome, elapsed_ms(started)))
        }
        .await;
        self.finish("tool_get", &cid, result)
    }

    /// Tool SET
    pub async fn tool_set(
        &self,
        headers: &RequestHeaders,
        request: ToolSetRequest,
    ) -> GatewayResult<StoreResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let store = request.into_store(namespace, principal.digest.clone())?;
            let receipt = self.with_deadline(self.engine.store(&store)).await?;
            self.limiter.record_usage(&principal).await?;
            Ok(StoreResponse::from_receipt(receipt, elapsed_ms(started)))
        }
        .await;
        self.finish("tool_set", &cid, result)
    }

    /// DB GET/CHECK
    pub async fn db_get(
        &self,
        headers: &RequestHeaders,
        request: DbGetRequest,
    ) -> GatewayResult<CacheReadResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let lookup = request.into_lookup(namespace, principal.digest.clone());
            let outcome = self.with_deadline(self.engine.lookup(&lookup)).await?;
            self.limiter.record_usage(&principal).await?;
            Ok(CacheReadResponse::from_outcome(outcome, elapsed_ms(started)))
        }
        .await;
        self.finish("db_get", &cid, result)
    }

    /// DB SET
    pub async fn db_set(
        &self,
        headers: &RequestHeaders,
        request: DbSetRequest,
    ) -> GatewayResult<StoreResponse> {
        let started = Instant::now();
        let cid = CorrelationId::new();
        let result = async {
            request.validate()?;
            let (principal, namespace) = self.admit(headers).await?;
            let store = request.into_store(namespace, principal.digest.clone())?;
            let receipt = self.with_deadline(self.engine.store(&store)).await?;
            self.limiter.record_usage(&principal).await?;
            Ok(StoreResponse::from_receipt(receipt, elapsed_ms(started)))
        }
        .await;
        self.finish("db_set", &cid, result)
    }

    /// Targeted invalidation
    pub async fn invalidate(
        &self,
        headers: &RequestHeaders,
        request: InvalidateRequest,
    ) -> GatewayResult<InvalidateResponse> {
        let cid = CorrelationId::new();
        let result = async {
            let (_principal, namespace) = self.admit(headers).await?;
            let invalidation = request.into_invalidation(namespace)?;
            let report = self
                .with_deadline(self.invalidator.invalidate(&invalidation))
                .await?;
            info!(
                invalidated = report.invalidated,
                scope = %report.scope,
                elapsed_ms = report.elapsed_ms,
                "invalidation completed"
            );
            Ok(InvalidateResponse::from(report))
        }
        .await;
        self.finish("invalidate", &cid, result)
    }

    /// Aggregate analytics over a window
    pub async fn analytics(
        &self,
        headers: &RequestHeaders,
        request: AnalyticsRequest,
    ) -> GatewayResult<AnalyticsSummary> {
        let cid = CorrelationId::new();
        let result = async {
            let period = request.period()?;
            let (_principal, _namespace) = self.admit(headers).await?;
            self.with_deadline(self.analytics.summarize(period)).await
        }
        .await;
        self.finish("analytics", &cid, result)
    }

    /// Process-local metric snapshot
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            session: self.engine.session().metrics(),
            engine: self.engine.counters().snapshot(),
            invalidation: self.invalidator.counters().snapshot(),
            gateway: self.counters.snapshot(),
        }
    }

    // ========================================================================
    // Policy chain
    // ========================================================================

    /// rate limit → authenticate → namespace → quota
    async fn admit(&self, headers: &RequestHeaders) -> GatewayResult<(Principal, String)> {
        self.counters.incr("requests");

        let credential = headers.credential().ok_or(GatewayError::MissingKey)?;
        let (kind, rate_identity) = auth::parse_key(credential)?;

        // Rate limit on the digest alone, before the auth lookup
        let provisional = Principal {
            kind,
            digest: None,
            rate_identity,
            tier: Tier::Free,
            monthly_quota: None,
        };
        let decision = self.limiter.check(&provisional).await?;
        if !decision.is_allowed() {
            self.counters.incr("denied.rate_limited");
            decision.into_result()?;
        }

        let principal = self.auth.authenticate(headers).await?;
        let namespace = self.auth.resolve_namespace(headers, &principal)?;

        if principal.kind == KeyKind::Live {
            if let Err(err) = self.limiter.check_quota(&principal).await {
                if matches!(err, GatewayError::QuotaExceeded { .. }) {
                    self.counters.incr("denied.quota");
                }
                return Err(err);
            }
        }

        Ok((principal, namespace))
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = GatewayResult<T>>,
    ) -> GatewayResult<T> {
        let deadline = Duration::from_secs(self.config.request_deadline_secs);
        match timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Internal(format!(
                "request deadline of {}s exceeded",
                self.config.request_deadline_secs
            ))),
        }
    }

    /// Log the outcome and pass it through
    fn finish<T>(
        &self,
        op: &'static str,
        cid: &CorrelationId,
        result: GatewayResult<T>,
    ) -> GatewayResult<T> {
        if let Err(err) = &result {
            self.counters.incr("errors");
            warn!(
                correlation_id = %cid,
                operation = op,
                kind = err.kind_str(),
                "request failed: {}",
                err
            );
        }
        result
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
