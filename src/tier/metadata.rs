//! Entry metadata
//!
//! Every cache entry has a sibling hash at `{entry_key}:meta` holding its
//! counters and timestamps. The hash shares the entry's TTL, so metadata
//! never outlives its entry by more than the store's expiry granularity.
//! Hits tolerate a missing or partial hash: every field decodes with a
//! default.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Metadata stored alongside a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Unix millis when the entry was written
    pub cached_at_ms: i64,
    /// Unix millis of the last hit; absent until the first hit
    pub last_accessed_ms: Option<i64>,
    /// Hits served from this entry (starts at 1: the write itself)
    pub access_count: u64,
    /// Entry TTL in seconds
    pub ttl_secs: u64,
    /// Result row count (db entries only)
    pub row_count: Option<u64>,
    /// Artifact version label (tool entries)
    pub version: Option<String>,
    /// Schema version the entry depends on (db entries)
    pub schema_version: Option<String>,
    /// Source URL for URL-scoped invalidation
    pub source_url: Option<String>,
}

impl EntryMetadata {
    /// Metadata for a freshly written entry
    pub fn for_new_entry(ttl_secs: u64) -> Self {
        Self {
            cached_at_ms: Utc::now().timestamp_millis(),
            last_accessed_ms: None,
            access_count: 1,
            ttl_secs,
            row_count: None,
            version: None,
            schema_version: None,
            source_url: None,
        }
    }

    /// Encode into hash fields
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("cached_at".to_string(), self.cached_at_ms.to_string()),
            ("access_count".to_string(), self.access_count.to_string()),
            ("ttl".to_string(), self.ttl_secs.to_string()),
        ];
        if let Some(at) = self.last_accessed_ms {
            fields.push(("last_accessed".to_string(), at.to_string()));
        }
        if let Some(rows) = self.row_count {
            fields.push(("row_count".to_string(), rows.to_string()));
        }
        if let Some(version) = &self.version {
            fields.push(("version".to_string(), version.clone()));
        }
        if let Some(schema) = &self.schema_version {
            fields.push(("schema_version".to_string(), schema.clone()));
        }
        if let Some(url) = &self.source_url {
            fields.push(("source_url".to_string(), url.clone()));
        }
        fields
    }

    /// Decode from hash fields; every field defaults when missing
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            cached_at_ms: parse_or(fields, "cached_at", 0),
            last_accessed_ms: fields.get("last_accessed").and_then(|v| v.parse().ok()),
            access_count: parse_or(fields, "access_count", 0),
            ttl_secs: parse_or(fields, "ttl", 0),
            row_count: fields.get("row_count").and_then(|v| v.parse().ok()),
            version: fields.get("version").cloned(),
            schema_version: fields.get("schema_version").cloned(),
            source_url: fields.get("source_url").cloned(),
        }
    }

    /// Age of the entry relative to `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.cached_at_ms
    }
}

fn parse_or<T: std::str::FromStr>(fields: &HashMap<String, String>, key: &str, default: T) -> T {
    fields
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
