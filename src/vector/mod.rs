//! Vector index driver for the semantic tier
//!
//! Abstraction over the external vector index that backs L3: `upsert` a
//! record with its embedding and metadata, `query` the nearest neighbors
//! under a metadata filter, `delete` a record when its entry is
//! invalidated. Embedding computation is a separate concern
//! behind the [`Embedder`] trait, so an external embedding service and the
//! built-in deterministic embedder are interchangeable.

pub mod embedding;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GatewayError;

/// Result type for vector operations
pub type VectorResult<T> = Result<T, VectorError>;

/// Vector driver errors
#[derive(Debug, Error)]
pub enum VectorError {
    /// Index unreachable or rejected the operation
    #[error("vector index error: {0}")]
    Index(String),

    /// Embedding computation failed
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl From<VectorError> for GatewayError {
    fn from(err: VectorError) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

/// Metadata stored alongside every semantic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// The cached response payload
    pub response: String,
    /// Unix millis when the record was cached
    pub cached_at_ms: i64,
    /// Record TTL in seconds
    pub ttl_secs: u64,
    /// Owning namespace
    pub namespace: String,
    /// Provider the response came from
    pub provider: String,
    /// Model the response came from
    pub model: String,
}

/// One query result
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    /// Record id (the L3 structured key)
    pub id: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    /// Stored metadata
    pub metadata: RecordMetadata,
}

/// Equality filter applied to record metadata at query time
///
/// `None` fields match anything. The tier engine always pins namespace,
/// provider, and model so one tenant's records never surface for another.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// Restrict to a namespace
    pub namespace: Option<String>,
    /// Restrict to a provider
    pub provider: Option<String>,
    /// Restrict to a model
    pub model: Option<String>,
}

impl MetadataFilter {
    /// Whether a record passes the filter
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        self.namespace
            .as_ref()
            .map(|ns| *ns == metadata.namespace)
            .unwrap_or(true)
            && self
                .provider
                .as_ref()
                .map(|p| *p == metadata.provider)
                .unwrap_or(true)
            && self
                .model
                .as_ref()
                .map(|m| *m == metadata.model)
                .unwrap_or(true)
    }
}

/// Async vector index driver
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a record
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: RecordMetadata)
        -> VectorResult<()>;

    /// Nearest-neighbor query under a metadata filter
    ///
    /// Results are ordered by descending score; ties broken by most recent
    /// `cached_at_ms`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> VectorResult<Vec<SemanticMatch>>;

    /// Remove a record; absent ids are a no-op
    async fn delete(&self, id: &str) -> VectorResult<()>;
}

/// Async embedding computation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a text into a fixed-dimension vector
    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>>;

    /// Output dimensionality
    fn dim(&self) -> usize;
}

/// Cosine similarity: dot(a,b) / (||a|| * ||b||)
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_metadata_filter() {
        let meta = RecordMetadata {
            response: "r".into(),
            cached_at_ms: 0,
            ttl_secs: 60,
            namespace: "acme".into(),
            provider: "openai".into(),
            model: "gpt-4".into(),
        };
        let mut filter = MetadataFilter::default();
        assert!(filter.matches(&meta));

        filter.namespace = Some("acme".into());
        filter.provider = Some("openai".into());
        filter.model = Some("gpt-4".into());
        assert!(filter.matches(&meta));

        filter.namespace = Some("other".into());
        assert!(!filter.matches(&meta));
    }
}
