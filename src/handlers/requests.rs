//! Request schemas and validation
//!
//! Every operation's input shape, with `validate()` enforcing the schema
//! rules before any fingerprinting or storage work happens. Conversion
//! methods produce the engine-level request types.

use serde::Deserialize;
use serde_json::Value;

use crate::auth::validate_key_component;
use crate::error::{GatewayError, GatewayResult};
use crate::fingerprint::{CanonicalRequest, Kind};
use crate::invalidate::{InvalidationRequest, InvalidationScope};
use crate::tier::{LookupRequest, StoreRequest};

use super::value_to_payload;

/// Upper bound on tags per entry
const MAX_TAGS: usize = 16;

fn validate_ttl(ttl: Option<i64>) -> GatewayResult<Option<u64>> {
    match ttl {
        None => Ok(None),
        Some(t) if t > 0 => Ok(Some(t as u64)),
        Some(_) => Err(GatewayError::InvalidInput("ttl must be positive".into())),
    }
}

fn validate_tags(tags: &[String]) -> GatewayResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(GatewayError::InvalidInput(format!(
            "at most {} tags per entry",
            MAX_TAGS
        )));
    }
    for tag in tags {
        validate_key_component("tag", tag)?;
    }
    Ok(())
}

// ============================================================================
// LLM
// ============================================================================

/// LLM GET/CHECK request
#[derive(Debug, Clone, Deserialize)]
pub struct LlmGetRequest {
    /// Provider name
    pub provider: String,
    /// Model name
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Value>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// `search` opts into the semantic tier
    #[serde(default)]
    pub action: Option<String>,
}

impl LlmGetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        if self.provider.is_empty() {
            return Err(GatewayError::InvalidInput("provider is required".into()));
        }
        if self.model.is_empty() {
            return Err(GatewayError::InvalidInput("model is required".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidInput("messages must be non-empty".into()));
        }
        Ok(())
    }

    /// Convert into a tier lookup
    pub fn into_lookup(self, namespace: String, tenant: Option<String>) -> LookupRequest {
        let semantic = self.action.as_deref() == Some("search");
        LookupRequest {
            request: CanonicalRequest::Llm {
                provider: self.provider,
                model: self.model,
                messages: self.messages,
                temperature: self.temperature,
            },
            namespace,
            db_name: None,
            tenant,
            semantic,
        }
    }
}

/// LLM SET request
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSetRequest {
    /// Provider name
    pub provider: String,
    /// Model name
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Value>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// The completion to cache
    pub response: Value,
    /// TTL override in seconds
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Invalidation tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source URL for URL-scoped invalidation
    #[serde(default)]
    pub source_url: Option<String>,
}

impl LlmSetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        if self.provider.is_empty() {
            return Err(GatewayError::InvalidInput("provider is required".into()));
        }
        if self.model.is_empty() {
            return Err(GatewayError::InvalidInput("model is required".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidInput("messages must be non-empty".into()));
        }
        validate_ttl(self.ttl)?;
        validate_tags(&self.tags)?;
        Ok(())
    }

    /// Convert into a tier store
    pub fn into_store(self, namespace: String, tenant: Option<String>) -> GatewayResult<StoreRequest> {
        let ttl_secs = validate_ttl(self.ttl)?;
        Ok(StoreRequest {
            payload: value_to_payload(&self.response),
            request: CanonicalRequest::Llm {
                provider: self.provider,
                model: self.model,
                messages: self.messages,
                temperature: self.temperature,
            },
            namespace,
            ttl_secs,
            tags: self.tags,
            db_name: None,
            row_count: None,
            source_url: self.source_url,
            tenant,
        })
    }
}

// ============================================================================
// Tool
// ============================================================================

/// Tool GET/CHECK request
#[derive(Debug, Clone, Deserialize)]
pub struct ToolGetRequest {
    /// Tool name
    pub tool_name: String,
    /// Call parameters
    pub parameters: Value,
    /// Tool version label; defaults to `v1`
    #[serde(default)]
    pub version: Option<String>,
}

impl ToolGetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        validate_key_component("tool_name", &self.tool_name)?;
        if !self.parameters.is_object() {
            return Err(GatewayError::InvalidInput(
                "parameters must be an object".into(),
            ));
        }
        Ok(())
    }

    /// Convert into a tier lookup
    pub fn into_lookup(self, namespace: String, tenant: Option<String>) -> LookupRequest {
        LookupRequest {
            request: CanonicalRequest::Tool {
                tool_name: self.tool_name,
                parameters: self.parameters,
                version: self.version.unwrap_or_else(|| "v1".to_string()),
            },
            namespace,
            db_name: None,
            tenant,
            semantic: false,
        }
    }
}

/// Tool SET request
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSetRequest {
    /// Tool name
    pub tool_name: String,
    /// Call parameters
    pub parameters: Value,
    /// The result to cache
    pub result: Value,
    /// TTL override in seconds
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Tool version label; defaults to `v1`
    #[serde(default)]
    pub version: Option<String>,
    /// Invalidation tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source URL for URL-scoped invalidation
    #[serde(default)]
    pub source_url: Option<String>,
}

impl ToolSetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        validate_key_component("tool_name", &self.tool_name)?;
        if !self.parameters.is_object() {
            return Err(GatewayError::InvalidInput(
                "parameters must be an object".into(),
            ));
        }
        validate_ttl(self.ttl)?;
        validate_tags(&self.tags)?;
        Ok(())
    }

    /// Convert into a tier store
    pub fn into_store(self, namespace: String, tenant: Option<String>) -> GatewayResult<StoreRequest> {
        let ttl_secs = validate_ttl(self.ttl)?;
        Ok(StoreRequest {
            payload: value_to_payload(&self.result),
            request: CanonicalRequest::Tool {
                tool_name: self.tool_name,
                parameters: self.parameters,
                version: self.version.unwrap_or_else(|| "v1".to_string()),
            },
            namespace,
            ttl_secs,
            tags: self.tags,
            db_name: None,
            row_count: None,
            source_url: self.source_url,
            tenant,
        })
    }
}

// ============================================================================
// DB
// ============================================================================

/// DB GET/CHECK request
#[derive(Debug, Clone, Deserialize)]
pub struct DbGetRequest {
    /// Database name
    pub db_name: String,
    /// Query text
    pub query: String,
    /// Bound parameters
    #[serde(default)]
    pub params: Option<Value>,
    /// Schema version the result depends on
    #[serde(default)]
    pub schema_version: Option<String>,
}

impl DbGetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        validate_key_component("db_name", &self.db_name)?;
        if self.query.is_empty() {
            return Err(GatewayError::InvalidInput("query is required".into()));
        }
        Ok(())
    }

    /// Convert into a tier lookup
    pub fn into_lookup(self, namespace: String, tenant: Option<String>) -> LookupRequest {
        LookupRequest {
            request: CanonicalRequest::Db {
                query: self.query,
                params: self.params,
                schema_version: self.schema_version,
            },
            namespace,
            db_name: Some(self.db_name),
            tenant,
            semantic: false,
        }
    }
}

/// DB SET request
#[derive(Debug, Clone, Deserialize)]
pub struct DbSetRequest {
    /// Database name
    pub db_name: String,
    /// Query text
    pub query: String,
    /// The result rows to cache
    pub rows: Value,
    /// Bound parameters
    #[serde(default)]
    pub params: Option<Value>,
    /// Schema version the result depends on
    #[serde(default)]
    pub schema_version: Option<String>,
    /// TTL override in seconds
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Invalidation tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source URL for URL-scoped invalidation
    #[serde(default)]
    pub source_url: Option<String>,
}

impl DbSetRequest {
    /// Schema validation
    pub fn validate(&self) -> GatewayResult<()> {
        validate_key_component("db_name", &self.db_name)?;
        if self.query.is_empty() {
            return Err(GatewayError::InvalidInput("query is required".into()));
        }
        validate_ttl(self.ttl)?;
        validate_tags(&self.tags)?;
        Ok(())
    }

    /// Convert into a tier store
    pub fn into_store(self, namespace: String, tenant: Option<String>) -> GatewayResult<StoreRequest> {
        let ttl_secs = validate_ttl(self.ttl)?;
        let row_count = self.rows.as_array().map(|rows| rows.len() as u64);
        Ok(StoreRequest {
            payload: value_to_payload(&self.rows),
            request: CanonicalRequest::Db {
                query: self.query,
                params: self.params,
                schema_version: self.schema_version.clone(),
            },
            namespace,
            ttl_secs,
            tags: self.tags,
            db_name: Some(self.db_name),
            row_count,
            source_url: self.source_url,
            tenant,
        })
    }
}

// ============================================================================
// Invalidation
// ============================================================================

/// Invalidation request; exactly one primary mode must be set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Exact entry key
    #[serde(default)]
    pub key: Option<String>,
    /// Wildcard pattern, matched after the namespace segment
    #[serde(default)]
    pub pattern: Option<String>,
    /// Kind whose keyspace a pattern sweeps; defaults to llm
    #[serde(default)]
    pub kind: Option<String>,
    /// Tags to resolve and clear
    #[serde(default)]
    pub tags: Vec<String>,
    /// Schema-version mode switch
    #[serde(default)]
    pub invalidate_schema: bool,
    /// Database name for schema mode
    #[serde(default)]
    pub db_name: Option<String>,
    /// Schema version for schema mode
    #[serde(default)]
    pub schema_version: Option<String>,
    /// Namespace-wide mode switch
    #[serde(default)]
    pub invalidate_namespace: bool,
    /// Confirmation for namespace-wide mode
    #[serde(default)]
    pub confirm: bool,
    /// Only touch entries at least this old (milliseconds)
    #[serde(default)]
    pub older_than_ms: Option<i64>,
    /// Only touch entries whose metadata source URL matches
    #[serde(default)]
    pub url: Option<String>,
}

impl InvalidateRequest {
    /// Resolve the primary scope; rejects zero or multiple modes
    pub fn scope(&self) -> GatewayResult<InvalidationScope> {
        let mut scopes: Vec<InvalidationScope> = Vec::new();

        if let Some(key) = &self.key {
            scopes.push(InvalidationScope::ExactKey { key: key.clone() });
        }
        if let Some(pattern) = &self.pattern {
            let kind = match self.kind.as_deref() {
                None | Some("llm") => Kind::Llm,
                Some("tool") => Kind::Tool,
                Some("db") => Kind::Db,
                Some(other) => {
                    return Err(GatewayError::InvalidInput(format!(
                        "unknown kind {}",
                        other
                    )))
                }
            };
            scopes.push(InvalidationScope::Pattern {
                kind,
                pattern: pattern.clone(),
            });
        }
        if !self.tags.is_empty() {
            validate_tags(&self.tags)?;
            scopes.push(InvalidationScope::Tags {
                tags: self.tags.clone(),
            });
        }
        if self.invalidate_schema {
            let db_name = self.db_name.clone().ok_or_else(|| {
                GatewayError::InvalidInput("schema invalidation requires db_name".into())
            })?;
            let schema_version = self.schema_version.clone().ok_or_else(|| {
                GatewayError::InvalidInput("schema invalidation requires schema_version".into())
            })?;
            scopes.push(InvalidationScope::SchemaVersion {
                db_name,
                schema_version,
            });
        }
        if self.invalidate_namespace {
            scopes.push(InvalidationScope::Namespace {
                confirm: self.confirm,
            });
        }

        match scopes.len() {
            0 => Err(GatewayError::InvalidScope(
                "one of key, pattern, tags, invalidate_schema, invalidate_namespace is required"
                    .into(),
            )),
            1 => Ok(scopes.into_iter().next().unwrap()),
            _ => Err(GatewayError::InvalidScope(
                "exactly one invalidation mode per request".into(),
            )),
        }
    }

    /// Convert into the engine request
    pub fn into_invalidation(self, namespace: String) -> GatewayResult<InvalidationRequest> {
        let scope = self.scope()?;
        Ok(InvalidationRequest {
            namespace,
            scope,
            older_than_ms: self.older_than_ms,
            url: self.url,
        })
    }
}

// ============================================================================
// Analytics
// ============================================================================

/// Analytics window read
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsRequest {
    /// Window label: `24h`, `7d`, or `30d`
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "24h".to_string()
}

impl AnalyticsRequest {
    /// Parse the window
    pub fn period(&self) -> GatewayResult<crate::analytics::Period> {
        crate::analytics::Period::parse(&self.period).ok_or_else(|| {
            GatewayError::InvalidInput(format!("unknown period {}", self.period))
        })
    }
}
