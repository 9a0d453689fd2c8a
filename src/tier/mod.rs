//! Three-tier cache hierarchy
//!
//! - L1 session: in-process bounded LRU, per-process state
//! - L2 exact: external KV keyed by the structured entry key
//! - L3 semantic: vector index consulted for LLM lookups that opt in
//!
//! The [`engine::TierEngine`] walks the tiers on GET and writes L2 (and
//! asynchronously L3) on SET. Latency targets per tier are informational
//! constants used by the analytics aggregator, never enforced.

pub mod engine;
pub mod metadata;
pub mod session;

use serde::{Deserialize, Serialize};

pub use engine::{LookupOutcome, LookupRequest, StoreReceipt, StoreRequest, TierEngine};
pub use metadata::EntryMetadata;
pub use session::SessionCache;

/// Cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    /// In-process session cache
    L1,
    /// Exact-key external KV
    L2,
    /// Semantic vector index
    L3,
}

impl TierLevel {
    /// Lowercase label used in stat counter keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::L3 => "l3",
        }
    }

    /// Expected lookup latency in milliseconds (informational)
    pub fn expected_latency_ms(&self) -> u64 {
        match self {
            Self::L1 => 3,
            Self::L2 => 35,
            Self::L3 => 150,
        }
    }

    /// All tiers, fastest first
    pub fn all() -> [TierLevel; 3] {
        [Self::L1, Self::L2, Self::L3]
    }
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful cache lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// Tier that served the hit
    pub tier: TierLevel,
    /// The stored payload, exactly as supplied at SET time
    pub payload: String,
    /// Best-effort JSON parse of the payload for response shaping
    pub parsed: Option<serde_json::Value>,
    /// Entry metadata when available; hits survive its absence
    pub metadata: Option<EntryMetadata>,
    /// The structured entry key (L2/L1) or semantic record id (L3)
    pub entry_key: String,
    /// Cosine similarity for L3 hits
    pub similarity: Option<f32>,
}
