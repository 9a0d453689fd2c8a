//! Analytics aggregation
//!
//! Rolls the daily KV counters up into a summary for a 1/7/30-day window
//! and derives hit rate, per-tier weighted latency, and estimated cost
//! savings. Counters are eventually consistent (hit-side updates are
//! fire-and-forget), and a day whose counter cannot be read contributes 0
//! rather than failing the whole read.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::keys;
use crate::kv::KvStore;
use crate::tier::TierLevel;

/// Reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    /// Last 24 hours (1 daily bucket)
    Day,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
}

impl Period {
    /// Number of daily buckets summed
    pub fn days(&self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }

    /// Parse the external period label
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "24h" | "1d" => Some(Self::Day),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            _ => None,
        }
    }
}

/// Hits per tier over the window
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TierBreakdown {
    /// Session tier hits
    pub l1: u64,
    /// Exact tier hits
    pub l2: u64,
    /// Semantic tier hits
    pub l3: u64,
}

impl TierBreakdown {
    /// Total hits across tiers
    pub fn total(&self) -> u64 {
        self.l1 + self.l2 + self.l3
    }
}

/// Aggregated analytics for one window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    /// Days summed
    pub period_days: u32,
    /// Hits per tier
    pub hits: TierBreakdown,
    /// Misses
    pub misses: u64,
    /// Tool-kind hits
    pub tool_hits: u64,
    /// DB-kind hits
    pub db_hits: u64,
    /// Stores per kind (llm/tool/db)
    pub sets: HashMap<String, u64>,
    /// Entries invalidated
    pub invalidations: u64,
    /// hits / (hits + misses); 0 when idle
    pub hit_rate: f64,
    /// Hit-weighted expected latency in milliseconds; 0 when no hits
    pub weighted_latency_ms: f64,
    /// Estimated savings in USD from the configured cost model
    pub estimated_cost_saved: f64,
}

/// Reads daily counters and derives summary metrics
pub struct AnalyticsAggregator {
    kv: Arc<dyn KvStore>,
    config: Arc<GatewayConfig>,
}

impl AnalyticsAggregator {
    /// Create an aggregator over the given KV store
    pub fn new(kv: Arc<dyn KvStore>, config: Arc<GatewayConfig>) -> Self {
        Self { kv, config }
    }

    /// Summarize the last `period` of traffic
    pub async fn summarize(&self, period: Period) -> GatewayResult<AnalyticsSummary> {
        let days = period.days();
        let dates: Vec<String> = (0..days)
            .map(|i| keys::date_bucket(Utc::now() - Duration::days(i as i64)))
            .collect();

        let mut hits = TierBreakdown::default();
        let mut misses = 0u64;
        let mut tool_hits = 0u64;
        let mut db_hits = 0u64;
        let mut sets: HashMap<String, u64> = HashMap::new();
        let mut invalidations = 0u64;

        for date in &dates {
            hits.l1 += self
                .read_counter(&keys::daily_hits(TierLevel::L1.as_str(), date))
                .await;
            hits.l2 += self
                .read_counter(&keys::daily_hits(TierLevel::L2.as_str(), date))
                .await;
            hits.l3 += self
                .read_counter(&keys::daily_hits(TierLevel::L3.as_str(), date))
                .await;
            misses += self.read_counter(&keys::daily_misses(date)).await;
            tool_hits += self
                .read_counter(&keys::daily_kind_stat("tool", "hits", date))
                .await;
            db_hits += self
                .read_counter(&keys::daily_kind_stat("db", "hits", date))
                .await;
            invalidations += self.read_counter(&keys::daily_invalidations(date)).await;
            for kind in ["llm", "tool", "db"] {
                let count = self
                    .read_counter(&keys::daily_kind_stat(kind, "sets", date))
                    .await;
                *sets.entry(kind.to_string()).or_insert(0) += count;
            }
        }

        let costs = &self.config.analytics.costs;
        Ok(AnalyticsSummary {
            period_days: days,
            hit_rate: hit_rate(hits.total(), misses),
            weighted_latency_ms: weighted_latency_ms(&hits),
            estimated_cost_saved: estimated_cost_saved(
                &hits,
                tool_hits,
                db_hits,
                costs.llm_call_cost,
                [costs.l1_hit_cost, costs.l2_hit_cost, costs.l3_hit_cost],
                costs.tool_hit_saving,
                costs.db_hit_saving,
            ),
            hits,
            misses,
            tool_hits,
            db_hits,
            sets,
            invalidations,
        })
    }

    /// Per-tenant usage rollup for one kind
    pub async fn tenant_usage(
        &self,
        digest: &str,
        kind: &str,
    ) -> GatewayResult<HashMap<String, u64>> {
        let fields = self
            .kv
            .hgetall(&keys::tenant_usage(digest, kind))
            .await
            .map_err(crate::error::GatewayError::from)?;
        Ok(fields
            .into_iter()
            .filter_map(|(field, value)| value.parse().ok().map(|v| (field, v)))
            .collect())
    }

    /// One counter; unreadable or absent days read as 0
    async fn read_counter(&self, key: &str) -> u64 {
        match self.kv.get(key).await {
            Ok(Some(value)) => value.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(_) => 0,
        }
    }
}

/// hits / (hits + misses)
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Σ (tier-hits × tier-latency) / Σ tier-hits
fn weighted_latency_ms(hits: &TierBreakdown) -> f64 {
    let total = hits.total();
    if total == 0 {
        return 0.0;
    }
    let weighted = hits.l1 * TierLevel::L1.expected_latency_ms()
        + hits.l2 * TierLevel::L2.expected_latency_ms()
        + hits.l3 * TierLevel::L3.expected_latency_ms();
    weighted as f64 / total as f64
}

/// Σ tier-hits × (llm call cost − tier serving cost) + tool/db savings
fn estimated_cost_saved(
    hits: &TierBreakdown,
    tool_hits: u64,
    db_hits: u64,
    llm_call_cost: f64,
    tier_costs: [f64; 3],
    tool_saving: f64,
    db_saving: f64,
) -> f64 {
    let tier_saved = hits.l1 as f64 * (llm_call_cost - tier_costs[0])
        + hits.l2 as f64 * (llm_call_cost - tier_costs[1])
        + hits.l3 as f64 * (llm_call_cost - tier_costs[2]);
    tier_saved + tool_hits as f64 * tool_saving + db_hits as f64 * db_saving
}
