//! Response shaping
//!
//! Success responses carry the serving tier, measured latency, and a
//! trailing fragment of the cache key for client-side correlation. Error
//! responses carry the stable error kind, a human-readable detail, and the
//! request's correlation id.

use serde::Serialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::invalidate::InvalidationReport;
use crate::keys;
use crate::observability::CorrelationId;
use crate::tier::{CacheHit, EntryMetadata, LookupOutcome, StoreReceipt, TierLevel};

use super::payload_to_value;

/// Trailing key chars exposed for correlation
const KEY_SUFFIX_LEN: usize = 12;

/// GET/CHECK response
#[derive(Debug, Clone, Serialize)]
pub struct CacheReadResponse {
    /// Whether any tier served the request
    pub hit: bool,
    /// Serving tier on a hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierLevel>,
    /// The cached artifact, parsed when it is JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Cosine similarity for semantic hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Entry metadata when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
    /// Wall time spent serving
    pub latency_ms: u64,
    /// Trailing fragment of the probed key
    pub cache_key: String,
}

impl CacheReadResponse {
    /// Shape a lookup outcome
    pub fn from_outcome(outcome: LookupOutcome, latency_ms: u64) -> Self {
        match outcome {
            LookupOutcome::Hit(hit) => Self::from_hit(hit, latency_ms),
            LookupOutcome::Miss { entry_key } => Self {
                hit: false,
                tier: None,
                response: None,
                similarity: None,
                metadata: None,
                latency_ms,
                cache_key: keys::suffix(&entry_key, KEY_SUFFIX_LEN),
            },
        }
    }

    fn from_hit(hit: CacheHit, latency_ms: u64) -> Self {
        let CacheHit {
            tier,
            payload,
            parsed,
            metadata,
            entry_key,
            similarity,
        } = hit;
        Self {
            hit: true,
            tier: Some(tier),
            response: Some(payload_to_value(&payload, parsed)),
            similarity,
            metadata,
            latency_ms,
            cache_key: keys::suffix(&entry_key, KEY_SUFFIX_LEN),
        }
    }
}

/// SET response
#[derive(Debug, Clone, Serialize)]
pub struct StoreResponse {
    /// Always true on success
    pub cached: bool,
    /// Effective TTL in seconds
    pub ttl: u64,
    /// Wall time spent storing
    pub latency_ms: u64,
    /// Trailing fragment of the entry key
    pub cache_key: String,
}

impl StoreResponse {
    /// Shape a store receipt
    pub fn from_receipt(receipt: StoreReceipt, latency_ms: u64) -> Self {
        Self {
            cached: true,
            ttl: receipt.ttl_secs,
            latency_ms,
            cache_key: keys::suffix(&receipt.entry_key, KEY_SUFFIX_LEN),
        }
    }
}

/// INVALIDATE response
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Entries removed
    pub invalidated: u64,
    /// Scope descriptor
    pub scope: String,
    /// Wall time spent
    pub elapsed_ms: u64,
}

impl From<InvalidationReport> for InvalidateResponse {
    fn from(report: InvalidationReport) -> Self {
        Self {
            invalidated: report.invalidated,
            scope: report.scope,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

/// Error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable error kind string
    pub error: String,
    /// Human-readable detail
    pub details: String,
    /// Correlation id for log lookup
    pub correlation_id: String,
    /// Retry hint in seconds, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    /// Build the envelope for an error
    pub fn from_error(err: &GatewayError, correlation_id: &CorrelationId) -> Self {
        Self {
            error: err.kind_str().to_string(),
            details: err.to_string(),
            correlation_id: correlation_id.as_str().to_string(),
            retry_after: err.retry_after(),
        }
    }
}
