//! Sliding-window rate limiting and monthly quota
//!
//! Both counters live in the external KV store and rely on atomic `INCR`,
//! so many gateway processes enforce one shared ceiling with no client-side
//! locking. The sliding window uses 1-minute buckets with a 2-minute TTL;
//! quota uses one counter per `(key, month)` with a 35-day TTL.
//!
//! Failure policy: when the store is unreachable the limiter fails open for
//! demo keys (availability for anonymous traffic) and fails closed for live
//! keys (a durably incremented counter can never be under-counted, so a
//! deny after increment is always honest).

use std::sync::Arc;

use tracing::warn;

use crate::auth::Principal;
use crate::config::RateLimitConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::keys;
use crate::kv::KvStore;

/// Rate limiting decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Request allowed
    Allowed {
        /// Requests left in the current window
        remaining: u64,
        /// Seconds until the window rolls over
        reset_after: u64,
    },
    /// Request denied
    Denied {
        /// Seconds until retry can succeed
        retry_after: u64,
        /// The enforced ceiling
        limit: u64,
    },
}

impl Decision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Convert a denial into the gateway error it surfaces as
    pub fn into_result(self) -> GatewayResult<()> {
        match self {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { retry_after, limit } => {
                Err(GatewayError::RateLimited { retry_after, limit })
            }
        }
    }
}

/// KV-backed sliding-window limiter plus monthly quota tracking
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter over the given KV store
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Check and consume one request from the principal's current window
    ///
    /// Runs before any expensive work; the increment itself is the
    /// reservation, so concurrent requests cannot sneak under the ceiling.
    pub async fn check(&self, principal: &Principal) -> GatewayResult<Decision> {
        let now = chrono::Utc::now().timestamp();
        let bucket = keys::rate_bucket(&principal.rate_identity, now / 60);
        let limit = principal.rpm(&self.config);

        let count = match self.kv.incr(&bucket).await {
            Ok(count) => count as u64,
            Err(err) if principal.is_demo() => {
                warn!(error = %err, "rate bucket unavailable, failing open for demo key");
                return Ok(Decision::Allowed {
                    remaining: limit,
                    reset_after: window_reset(now),
                });
            }
            Err(err) => return Err(err.into()),
        };

        if count == 1 {
            // Fresh bucket: bound its lifetime. Failure here only delays
            // cleanup; the bucket key embeds the minute so it can never
            // leak into a later window.
            if let Err(err) = self.kv.expire(&bucket, self.config.bucket_ttl_secs).await {
                warn!(error = %err, bucket = %bucket, "failed to set rate bucket ttl");
            }
        }

        if count > limit {
            Ok(Decision::Denied {
                retry_after: window_reset(now),
                limit,
            })
        } else {
            Ok(Decision::Allowed {
                remaining: limit - count,
                reset_after: window_reset(now),
            })
        }
    }

    /// Check the principal's monthly quota without consuming it
    ///
    /// Demo principals bypass quota. Runs before the tier engine so an
    /// exhausted tenant does no work.
    pub async fn check_quota(&self, principal: &Principal) -> GatewayResult<()> {
        let (digest, limit) = match (&principal.digest, principal.monthly_quota) {
            (Some(digest), Some(limit)) => (digest, limit),
            _ => return Ok(()),
        };

        let counter = keys::quota_counter(digest, &keys::this_month());
        let used: u64 = self
            .kv
            .get(&counter)
            .await
            .map_err(GatewayError::from)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if used >= limit {
            return Err(GatewayError::QuotaExceeded { used, limit });
        }
        Ok(())
    }

    /// Consume one unit of monthly quota after successful work
    ///
    /// Called only after a store or lookup completed, so failed requests
    /// never burn quota. Idempotent in shape (`INCR` + first-write TTL).
    pub async fn record_usage(&self, principal: &Principal) -> GatewayResult<()> {
        let digest = match &principal.digest {
            Some(digest) => digest,
            None => return Ok(()),
        };

        let counter = keys::quota_counter(digest, &keys::this_month());
        let count = self.kv.incr(&counter).await.map_err(GatewayError::from)?;
        if count == 1 {
            if let Err(err) = self.kv.expire(&counter, self.config.quota_ttl_secs).await {
                warn!(error = %err, counter = %counter, "failed to set quota ttl");
            }
        }
        Ok(())
    }
}

/// Seconds until the current 60-second window rolls over
fn window_reset(now_secs: i64) -> u64 {
    (60 - (now_secs % 60)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, RequestHeaders, Tier};
    use crate::kv::memory::MemoryKv;

    async fn demo_principal(kv: Arc<MemoryKv>) -> Principal {
        Authenticator::new(kv, RateLimitConfig::default())
            .authenticate(&RequestHeaders::with_key("ac_demo_test"))
            .await
            .unwrap()
    }

    async fn live_principal(kv: Arc<MemoryKv>, quota: u64) -> Principal {
        let auth = Authenticator::new(kv, RateLimitConfig::default());
        auth.provision_live_key("ac_live_rl", "o@x.test", Tier::Pro, quota)
            .await
            .unwrap();
        auth.authenticate(&RequestHeaders::with_key("ac_live_rl"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_window_enforces_rpm() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                demo_rpm: 5,
                ..Default::default()
            },
        );
        let principal = demo_principal(kv).await;

        for _ in 0..5 {
            assert!(limiter.check(&principal).await.unwrap().is_allowed());
        }
        let decision = limiter.check(&principal).await.unwrap();
        assert!(!decision.is_allowed());
        match decision {
            Decision::Denied { retry_after, limit } => {
                assert_eq!(limit, 5);
                assert!(retry_after >= 1 && retry_after <= 60);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_denial_converts_to_error() {
        let decision = Decision::Denied {
            retry_after: 9,
            limit: 100,
        };
        let err = decision.into_result().unwrap_err();
        assert_eq!(err.kind_str(), "rate_limited");
        assert_eq!(err.retry_after(), Some(9));
    }

    #[tokio::test]
    async fn test_demo_fails_open_when_store_down() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), RateLimitConfig::default());
        let principal = demo_principal(kv.clone()).await;

        kv.set_offline(true);
        assert!(limiter.check(&principal).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_live_fails_closed_when_store_down() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), RateLimitConfig::default());
        let principal = live_principal(kv.clone(), 1000).await;

        kv.set_offline(true);
        let err = limiter.check(&principal).await.unwrap_err();
        assert_eq!(err.kind_str(), "storage_error");
    }

    #[tokio::test]
    async fn test_quota_check_and_record() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), RateLimitConfig::default());
        let principal = live_principal(kv.clone(), 3).await;

        for _ in 0..3 {
            limiter.check_quota(&principal).await.unwrap();
            limiter.record_usage(&principal).await.unwrap();
        }
        let err = limiter.check_quota(&principal).await.unwrap_err();
        assert_eq!(err.kind_str(), "quota_exceeded");
        match err {
            GatewayError::QuotaExceeded { used, limit } => {
                assert_eq!(used, 3);
                assert_eq!(limit, 3);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_demo_bypasses_quota() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), RateLimitConfig::default());
        let principal = demo_principal(kv).await;

        for _ in 0..10 {
            limiter.check_quota(&principal).await.unwrap();
            limiter.record_usage(&principal).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rate_bucket_gets_ttl() {
        let kv = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv.clone(), RateLimitConfig::default());
        let principal = demo_principal(kv.clone()).await;

        limiter.check(&principal).await.unwrap();
        let minute = keys::minute_epoch();
        let mut ttl = kv
            .ttl(&keys::rate_bucket(&principal.rate_identity, minute))
            .await
            .unwrap();
        if ttl == -2 {
            // The minute rolled over between check and assertion
            ttl = kv
                .ttl(&keys::rate_bucket(&principal.rate_identity, minute - 1))
                .await
                .unwrap();
        }
        assert!(ttl > 0 && ttl <= 120);
    }
}
