//! # AgentCache - Multi-Tenant Cache Gateway for AI Workloads
//!
//! A cache gateway for LLM completions, tool/function call results, and
//! database query results, with optional semantic lookup over natural
//! language prompts.
//!
//! ## Architecture
//!
//! - `fingerprint`: deterministic request canonicalization and digests
//! - `keys`: structured key templates (the stable external surface)
//! - `kv`: driver over the external key-value store (memory + redis)
//! - `vector`: driver over the vector index and embedding computation
//! - `auth`: API key authentication and namespace tenancy
//! - `ratelimit`: sliding-window rate limiting and monthly quota
//! - `tier`: the L1/L2/L3 cache hierarchy and its engine
//! - `invalidate`: bounded pattern/tag/schema/namespace invalidation
//! - `analytics`: daily counter aggregation and derived metrics
//! - `handlers`: operation schemas, validation, and response shaping
//! - `gateway`: the policy chain tying it all together
//! - `observability`: tracing, correlation ids, process-local counters
//! - `config`: operational parameters and defaults

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundations
pub mod config;
pub mod error;
pub mod keys;
pub mod observability;

// Request identity
pub mod fingerprint;

// External store drivers
pub mod kv;
pub mod vector;

// Tenancy and admission
pub mod auth;
pub mod ratelimit;

// Cache core
pub mod invalidate;
pub mod tier;

// Accounting
pub mod analytics;

// Operation surface
pub mod gateway;
pub mod handlers;

// Re-export the types most callers need
pub use auth::{Principal, RequestHeaders, Tier};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use fingerprint::{fingerprint, CanonicalRequest, Fingerprint, Kind};
pub use gateway::{CacheGateway, GatewayStats};
pub use tier::TierLevel;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
