//! Structured key templates
//!
//! Every key the gateway writes is built here. The formats are a stable
//! external surface: clients rely on the prefixes for sweeps, and the
//! invalidation engine reconstructs scopes from them. Change a template and
//! every existing deployment's cache goes cold.
//!
//! | Kind | Template |
//! |---|---|
//! | LLM entry | `agentcache:v1:{namespace}:{provider}:{model}:{digest}` |
//! | Tool entry | `agentcache:tool:{version}:{namespace}:{tool_name}:{digest}` |
//! | DB entry | `agentcache:db:v1:{namespace}:{db_name}:{digest}` |
//! | Metadata | `{entry_key}:meta` |
//! | Tag index | `tag:{namespace}:{tag}` |
//! | Schema index | `schema:{namespace}:{db_name}:{schema_version}` |
//! | LLM semantic | `ns:{namespace}:semantic:v1:{provider}:{model}:{digest}` |
//! | Daily hits | `stats:global:hits:{tier}:d:{YYYY-MM-DD}` |
//! | Daily misses | `stats:global:misses:d:{YYYY-MM-DD}` |
//! | Rate bucket | `rl:{key_digest}:{minute_epoch}` |
//! | Quota | `quota:{key_digest}:m:{YYYY-MM}` |

use chrono::{DateTime, Utc};

/// Suffix appended to an entry key to address its metadata hash
pub const META_SUFFIX: &str = ":meta";

/// LLM entry key
pub fn llm_entry(namespace: &str, provider: &str, model: &str, digest: &str) -> String {
    format!("agentcache:v1:{}:{}:{}:{}", namespace, provider, model, digest)
}

/// Tool entry key
pub fn tool_entry(version: &str, namespace: &str, tool_name: &str, digest: &str) -> String {
    format!("agentcache:tool:{}:{}:{}:{}", version, namespace, tool_name, digest)
}

/// DB entry key
pub fn db_entry(namespace: &str, db_name: &str, digest: &str) -> String {
    format!("agentcache:db:v1:{}:{}:{}", namespace, db_name, digest)
}

/// Metadata hash key for an entry
pub fn meta(entry_key: &str) -> String {
    format!("{}{}", entry_key, META_SUFFIX)
}

/// Tag index set
pub fn tag_index(namespace: &str, tag: &str) -> String {
    format!("tag:{}:{}", namespace, tag)
}

/// Schema-version index set
pub fn schema_index(namespace: &str, db_name: &str, schema_version: &str) -> String {
    format!("schema:{}:{}:{}", namespace, db_name, schema_version)
}

/// Semantic (L3) record id
pub fn semantic_record(namespace: &str, provider: &str, model: &str, digest: &str) -> String {
    format!("ns:{}:semantic:v1:{}:{}:{}", namespace, provider, model, digest)
}

/// All entry keys under a namespace, as a sweep pattern
pub fn namespace_pattern(namespace: &str) -> Vec<String> {
    vec![
        format!("agentcache:v1:{}:*", namespace),
        format!("agentcache:tool:*:{}:*", namespace),
        format!("agentcache:db:v1:{}:*", namespace),
    ]
}

/// Daily per-tier hit counter
pub fn daily_hits(tier: &str, date: &str) -> String {
    format!("stats:global:hits:{}:d:{}", tier, date)
}

/// Daily miss counter
pub fn daily_misses(date: &str) -> String {
    format!("stats:global:misses:d:{}", date)
}

/// Daily per-kind counter (`sets`, `hits`, …)
pub fn daily_kind_stat(kind: &str, stat: &str, date: &str) -> String {
    format!("stats:{}:{}:d:{}", kind, stat, date)
}

/// Daily invalidation counter
pub fn daily_invalidations(date: &str) -> String {
    format!("stats:invalidations:d:{}", date)
}

/// Per-tenant usage rollup hash
pub fn tenant_usage(digest: &str, kind: &str) -> String {
    format!("usage:{}:{}", digest, kind)
}

/// Sliding-window rate bucket
pub fn rate_bucket(key_digest: &str, minute_epoch: i64) -> String {
    format!("rl:{}:{}", key_digest, minute_epoch)
}

/// Monthly quota counter
pub fn quota_counter(key_digest: &str, month: &str) -> String {
    format!("quota:{}:m:{}", key_digest, month)
}

/// `YYYY-MM-DD` for a timestamp
pub fn date_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` for a timestamp
pub fn month_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Today's `YYYY-MM-DD` in UTC
pub fn today() -> String {
    date_bucket(Utc::now())
}

/// Current `YYYY-MM` in UTC
pub fn this_month() -> String {
    month_bucket(Utc::now())
}

/// Current minute epoch (`floor(unix_seconds / 60)`)
pub fn minute_epoch() -> i64 {
    Utc::now().timestamp() / 60
}

/// Namespace embedded in a structured entry key, if the key is one
///
/// Used to verify tenancy before honoring exact-key invalidation.
pub fn key_namespace(key: &str) -> Option<&str> {
    let segments: Vec<&str> = key.split(':').collect();
    match segments.as_slice() {
        ["agentcache", "v1", ns, _provider, _model, _digest] => Some(ns),
        ["agentcache", "tool", _version, ns, _tool, _digest] => Some(ns),
        ["agentcache", "db", "v1", ns, _db, _digest] => Some(ns),
        _ => None,
    }
}

/// Semantic record id that shadows an LLM entry key, if any
///
/// Only LLM entries have L3 records; invalidation uses this to purge the
/// record alongside the entry.
pub fn semantic_record_for_entry(entry_key: &str) -> Option<String> {
    let segments: Vec<&str> = entry_key.split(':').collect();
    match segments.as_slice() {
        ["agentcache", "v1", ns, provider, model, digest] => {
            Some(semantic_record(ns, provider, model, digest))
        }
        _ => None,
    }
}

/// Trailing fragment of a key for response diagnostics
pub fn suffix(key: &str, len: usize) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= len {
        key.to_string()
    } else {
        chars[chars.len() - len..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_key_templates() {
        assert_eq!(
            llm_entry("acme", "openai", "gpt-4", "abc"),
            "agentcache:v1:acme:openai:gpt-4:abc"
        );
        assert_eq!(
            tool_entry("v1", "acme", "weather", "abc"),
            "agentcache:tool:v1:acme:weather:abc"
        );
        assert_eq!(
            db_entry("acme", "orders", "abc"),
            "agentcache:db:v1:acme:orders:abc"
        );
    }

    #[test]
    fn test_meta_and_index_keys() {
        assert_eq!(meta("agentcache:v1:a:b:c:d"), "agentcache:v1:a:b:c:d:meta");
        assert_eq!(tag_index("acme", "user-1"), "tag:acme:user-1");
        assert_eq!(schema_index("acme", "orders", "2"), "schema:acme:orders:2");
        assert_eq!(
            semantic_record("acme", "openai", "gpt-4", "abc"),
            "ns:acme:semantic:v1:openai:gpt-4:abc"
        );
    }

    #[test]
    fn test_stat_keys() {
        assert_eq!(
            daily_hits("l2", "2026-08-01"),
            "stats:global:hits:l2:d:2026-08-01"
        );
        assert_eq!(daily_misses("2026-08-01"), "stats:global:misses:d:2026-08-01");
        assert_eq!(
            daily_kind_stat("llm", "sets", "2026-08-01"),
            "stats:llm:sets:d:2026-08-01"
        );
        assert_eq!(rate_bucket("deadbeef", 29_000_000), "rl:deadbeef:29000000");
        assert_eq!(quota_counter("deadbeef", "2026-08"), "quota:deadbeef:m:2026-08");
    }

    #[test]
    fn test_date_buckets() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap();
        assert_eq!(date_bucket(at), "2026-08-01");
        assert_eq!(month_bucket(at), "2026-08");
    }

    #[test]
    fn test_suffix() {
        assert_eq!(suffix("abcdef", 3), "def");
        assert_eq!(suffix("ab", 3), "ab");
    }

    #[test]
    fn test_key_namespace() {
        assert_eq!(
            key_namespace("agentcache:v1:acme:openai:gpt-4:abc"),
            Some("acme")
        );
        assert_eq!(
            key_namespace("agentcache:tool:v1:acme:weather:abc"),
            Some("acme")
        );
        assert_eq!(key_namespace("agentcache:db:v1:acme:orders:abc"), Some("acme"));
        assert_eq!(key_namespace("rl:deadbeef:123"), None);
        assert_eq!(key_namespace("agentcache:v1:acme:short"), None);
    }

    #[test]
    fn test_semantic_record_for_entry() {
        assert_eq!(
            semantic_record_for_entry("agentcache:v1:acme:openai:gpt-4:abc"),
            Some("ns:acme:semantic:v1:openai:gpt-4:abc".to_string())
        );
        assert_eq!(
            semantic_record_for_entry("agentcache:tool:v1:acme:weather:abc"),
            None
        );
        assert_eq!(semantic_record_for_entry("agentcache:db:v1:acme:orders:abc"), None);
    }

    #[test]
    fn test_namespace_patterns_cover_all_kinds() {
        let patterns = namespace_pattern("acme");
        assert_eq!(patterns.len(), 3);
        assert!(patterns.iter().all(|p| p.contains("acme")));
    }
}
