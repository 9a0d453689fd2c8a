//! Gateway configuration and operational defaults
//!
//! All tunable parameters live here: rate limits, TTL defaults, scan caps,
//! semantic-tier thresholds, and the analytics cost model. Every struct has
//! a `Default` impl matching the documented operational defaults, and the
//! root config round-trips through JSON on disk.

use serde::{Deserialize, Serialize};

/// Root configuration for the cache gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Rate limiting and quota parameters
    pub rate_limit: RateLimitConfig,

    /// Per-kind TTL defaults
    pub ttl: TtlDefaults,

    /// Invalidation sweep caps
    pub scan: ScanLimits,

    /// L3 semantic tier parameters
    pub semantic: SemanticConfig,

    /// L1 session cache parameters
    pub session: SessionCacheConfig,

    /// Analytics counters and cost model
    pub analytics: AnalyticsConfig,

    /// Ambient per-request deadline in seconds
    pub request_deadline_secs: u64,

    /// Extra lifetime granted to tag/schema index sets beyond the entry TTL
    pub index_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            ttl: TtlDefaults::default(),
            scan: ScanLimits::default(),
            semantic: SemanticConfig::default(),
            session: SessionCacheConfig::default(),
            analytics: AnalyticsConfig::default(),
            request_deadline_secs: 5,
            index_grace_secs: 3600,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Rate limiting and quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute for demo keys
    pub demo_rpm: u64,
    /// Requests per minute for live keys
    pub live_rpm: u64,
    /// TTL on per-minute rate buckets (seconds)
    pub bucket_ttl_secs: u64,
    /// TTL on monthly quota counters (seconds)
    pub quota_ttl_secs: u64,
    /// Monthly quota applied when a key record carries none
    pub default_monthly_quota: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            demo_rpm: 100,
            live_rpm: 500,
            bucket_ttl_secs: 120,
            quota_ttl_secs: 35 * 24 * 3600, // 35 days
            default_monthly_quota: 100_000,
        }
    }
}

/// Per-kind entry TTL defaults (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlDefaults {
    /// LLM completions
    pub llm_secs: u64,
    /// Tool/function call results
    pub tool_secs: u64,
    /// Database query results
    pub db_secs: u64,
}

impl Default for TtlDefaults {
    fn default() -> Self {
        Self {
            llm_secs: 604_800, // 7 days
            tool_secs: 3600,   // 1 hour
            db_secs: 300,      // 5 minutes
        }
    }
}

impl TtlDefaults {
    /// Default TTL for a cache kind
    pub fn for_kind(&self, kind: crate::fingerprint::Kind) -> u64 {
        match kind {
            crate::fingerprint::Kind::Llm => self.llm_secs,
            crate::fingerprint::Kind::Tool => self.tool_secs,
            crate::fingerprint::Kind::Db => self.db_secs,
        }
    }
}

/// Invalidation sweep caps
///
/// Every sweep is bounded twice: by total keys touched and by SCAN
/// iterations, so a pathological pattern cannot pin the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLimits {
    /// Key cap per non-namespace invalidation
    pub max_keys: usize,
    /// Key cap per namespace-wide sweep
    pub max_namespace_keys: usize,
    /// SCAN iterations before forced stop
    pub iter_cap: usize,
    /// Keys per delete pipeline batch
    pub delete_batch_size: usize,
    /// COUNT hint passed to SCAN
    pub scan_count_hint: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_keys: 1000,
            max_namespace_keys: 10_000,
            iter_cap: 100,
            delete_batch_size: 100,
            scan_count_hint: 100,
        }
    }
}

/// L3 semantic tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Whether the semantic tier is consulted at all
    pub enabled: bool,
    /// Minimum cosine similarity to accept an L3 candidate
    pub threshold: f32,
    /// Candidates fetched per query before threshold filtering
    pub top_k: usize,
    /// Dimensionality of locally computed embeddings
    pub embedding_dim: usize,
    /// TTL for semantic records (seconds)
    pub record_ttl_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.85,
            top_k: 4,
            embedding_dim: 256,
            record_ttl_secs: 604_800, // 7 days
        }
    }
}

/// L1 session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Soft entry cap; LRU eviction beyond this
    pub capacity: usize,
    /// Session entry TTL (seconds)
    pub ttl_secs: u64,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 60,
        }
    }
}

/// Analytics configuration: counter retention plus the cost model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// TTL on daily stat counters (seconds)
    pub counter_ttl_secs: u64,
    /// Cost model used for savings estimation
    pub costs: AnalyticsCosts,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            counter_ttl_secs: 7 * 24 * 3600, // 7 days
            costs: AnalyticsCosts::default(),
        }
    }
}

/// Cost constants for savings estimation (USD)
///
/// These are informational configuration, not contracts. The aggregator's
/// formulas are what tests pin down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsCosts {
    /// Assumed cost of the LLM call a cache hit avoided
    pub llm_call_cost: f64,
    /// Serving cost of an L1 hit
    pub l1_hit_cost: f64,
    /// Serving cost of an L2 hit
    pub l2_hit_cost: f64,
    /// Serving cost of an L3 hit (embedding + vector query)
    pub l3_hit_cost: f64,
    /// Savings attributed to one tool-result hit
    pub tool_hit_saving: f64,
    /// Savings attributed to one db-result hit
    pub db_hit_saving: f64,
}

impl Default for AnalyticsCosts {
    fn default() -> Self {
        Self {
            llm_call_cost: 0.002,
            l1_hit_cost: 0.000_001,
            l2_hit_cost: 0.000_01,
            l3_hit_cost: 0.000_1,
            tool_hit_saving: 0.000_5,
            db_hit_saving: 0.000_1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.rate_limit.demo_rpm, 100);
        assert_eq!(config.rate_limit.live_rpm, 500);
        assert_eq!(config.ttl.llm_secs, 604_800);
        assert_eq!(config.ttl.tool_secs, 3600);
        assert_eq!(config.ttl.db_secs, 300);
        assert_eq!(config.scan.max_keys, 1000);
        assert_eq!(config.scan.max_namespace_keys, 10_000);
        assert_eq!(config.scan.iter_cap, 100);
        assert_eq!(config.scan.delete_batch_size, 100);
        assert!((config.semantic.threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.request_deadline_secs, 5);
        assert_eq!(config.index_grace_secs, 3600);
    }

    #[test]
    fn test_json_round_trip() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rate_limit.live_rpm, config.rate_limit.live_rpm);
        assert_eq!(back.scan.iter_cap, config.scan.iter_cap);
        assert_eq!(back.session.capacity, config.session.capacity);
    }

    #[test]
    fn test_file_round_trip() {
        let config = GatewayConfig::default();
        let path = std::env::temp_dir().join("agentcache_config_test.json");
        let path = path.to_str().unwrap();
        config.save(path).unwrap();
        let loaded = GatewayConfig::from_file(path).unwrap();
        assert_eq!(loaded.ttl.db_secs, 300);
        let _ = std::fs::remove_file(path);
    }
}
