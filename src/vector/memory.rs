//! In-memory vector index
//!
//! Brute-force cosine scan over live records; fine at the scale tests and
//! the demo binary need. Records expire lazily against their own TTL, the
//! same way the external index expires semantic records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{
    cosine_similarity, MetadataFilter, RecordMetadata, SemanticMatch, VectorIndex, VectorResult,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    vector: Vec<f32>,
    metadata: RecordMetadata,
}

impl StoredRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        let deadline = self.metadata.cached_at_ms + (self.metadata.ttl_secs as i64) * 1000;
        now_ms >= deadline
    }
}

/// Brute-force in-memory vector index
#[derive(Clone, Default)]
pub struct MemoryVectorIndex {
    records: Arc<DashMap<String, StoredRecord>>,
}

impl MemoryVectorIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records; test helper
    pub fn live_len(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        self.records
            .iter()
            .filter(|r| !r.value().is_expired(now_ms))
            .count()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: RecordMetadata,
    ) -> VectorResult<()> {
        self.records
            .insert(id.to_string(), StoredRecord { vector, metadata });
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> VectorResult<Vec<SemanticMatch>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut matches: Vec<SemanticMatch> = self
            .records
            .iter()
            .filter(|r| !r.value().is_expired(now_ms) && filter.matches(&r.value().metadata))
            .map(|r| SemanticMatch {
                id: r.key().clone(),
                score: cosine_similarity(vector, &r.value().vector),
                metadata: r.value().metadata.clone(),
            })
            .collect();

        // Highest score first; equal scores break toward the freshest record
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.metadata.cached_at_ms.cmp(&a.metadata.cached_at_ms))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> VectorResult<()> {
        self.records.remove(id);
        Ok(())
    }
}
