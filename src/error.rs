//! Gateway-wide error taxonomy
//!
//! Every externally observable failure maps onto one of the kinds below.
//! Each kind carries a stable machine-readable string (`kind_str`) plus a
//! human-readable message; handlers wrap both into the error envelope
//! together with a correlation id.

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No API key supplied in the request headers
    #[error("missing API key")]
    MissingKey,

    /// API key prefix is not `ac_demo_` or `ac_live_`
    #[error("bad API key format: {0}")]
    BadKeyFormat(String),

    /// Key digest has no metadata record, or the record has no owner
    #[error("unknown API key")]
    UnknownKey,

    /// Principal is not allowed to touch the requested namespace
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request failed schema validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sliding-window rate limit exceeded
    #[error("rate limit exceeded: retry after {retry_after}s")]
    RateLimited {
        /// Seconds until the current window rolls over
        retry_after: u64,
        /// The enforced requests-per-minute ceiling
        limit: u64,
    },

    /// Monthly quota exhausted
    #[error("monthly quota exceeded: {used}/{limit}")]
    QuotaExceeded {
        /// Requests consumed this month
        used: u64,
        /// The tier's monthly allowance
        limit: u64,
    },

    /// KV or vector store unavailable or misbehaving
    #[error("storage error: {0}")]
    Storage(String),

    /// Namespace-wide invalidation attempted without the confirm flag
    #[error("scope too broad: {0}")]
    ScopeTooBroad(String),

    /// Invalidation request named no scope at all
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Fallthrough; always logged with a correlation id
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable kind string carried in error responses
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::MissingKey => "missing_key",
            Self::BadKeyFormat(_) => "bad_key_format",
            Self::UnknownKey => "unknown_key",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Storage(_) => "storage_error",
            Self::ScopeTooBroad(_) => "scope_too_broad",
            Self::InvalidScope(_) => "invalid_scope",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether a client retry can reasonably succeed
    pub fn retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Storage(_))
    }

    /// Retry-after hint in seconds, when one applies
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
