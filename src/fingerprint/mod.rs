//! Request fingerprinting
//!
//! Canonicalizes a request descriptor and emits a stable 256-bit digest.
//! Determinism is the contract clients rely on: identical canonical inputs
//! always produce identical digests, and any difference in a canonical
//! field produces a different digest. Canonical fields are concatenated
//! with `:` separators in a fixed order per kind before hashing:
//!
//! - llm:  `provider, model, messages, temperature`
//! - tool: `tool_name, parameters, version`
//! - db:   `query, params, schema_version`

pub mod canonical;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, GatewayResult};
use canonical::{canonical_float, canonical_json};

/// Cache kind: the closed set of artifact families the gateway stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// LLM completion
    Llm,
    /// Tool/function call result
    Tool,
    /// Database query result
    Db,
}

impl Kind {
    /// Lowercase name used in stat counters and key templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Db => "db",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical inputs for one request, tagged by kind
///
/// Payload-bearing fields (`messages`, `parameters`, `params`) are opaque
/// JSON; the fingerprinter never interprets them beyond canonicalization.
#[derive(Debug, Clone)]
pub enum CanonicalRequest {
    /// LLM completion request identity
    Llm {
        /// Provider name, e.g. `openai`
        provider: String,
        /// Model name, e.g. `gpt-4`
        model: String,
        /// Conversation messages, opaque JSON values
        messages: Vec<Value>,
        /// Sampling temperature; absent means provider default
        temperature: Option<f64>,
    },
    /// Tool/function call identity
    Tool {
        /// Tool name
        tool_name: String,
        /// Call parameters (JSON object)
        parameters: Value,
        /// Tool version label
        version: String,
    },
    /// Database query identity
    Db {
        /// Query text
        query: String,
        /// Bound parameters, if any
        params: Option<Value>,
        /// Schema version the result shape depends on
        schema_version: Option<String>,
    },
}

impl CanonicalRequest {
    /// The kind tag for this request
    pub fn kind(&self) -> Kind {
        match self {
            Self::Llm { .. } => Kind::Llm,
            Self::Tool { .. } => Kind::Tool,
            Self::Db { .. } => Kind::Db,
        }
    }
}

/// A computed fingerprint: digest plus the canonical text it was taken over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Kind tag
    pub kind: Kind,
    /// SHA-256 of the canonical text, lowercase hex, 64 chars
    pub digest: String,
    /// The canonical `:`-joined input text (reused as embedding input)
    pub canonical: String,
}

/// Compute the fingerprint for a canonical request
///
/// Fails with `InvalidInput` when a required field is missing for the kind.
pub fn fingerprint(request: &CanonicalRequest) -> GatewayResult<Fingerprint> {
    let canonical = canonical_text(request)?;
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    Ok(Fingerprint {
        kind: request.kind(),
        digest,
        canonical,
    })
}

/// Build the canonical `:`-joined text for a request
fn canonical_text(request: &CanonicalRequest) -> GatewayResult<String> {
    match request {
        CanonicalRequest::Llm {
            provider,
            model,
            messages,
            temperature,
        } => {
            if provider.is_empty() {
                return Err(GatewayError::InvalidInput("llm: provider is required".into()));
            }
            if model.is_empty() {
                return Err(GatewayError::InvalidInput("llm: model is required".into()));
            }
            if messages.is_empty() {
                return Err(GatewayError::InvalidInput(
                    "llm: messages must be non-empty".into(),
                ));
            }
            let messages_json = canonical_json(&Value::Array(messages.clone()));
            let temp = temperature.map(canonical_float).unwrap_or_default();
            Ok(format!("{}:{}:{}:{}", provider, model, messages_json, temp))
        }
        CanonicalRequest::Tool {
            tool_name,
            parameters,
            version,
        } => {
            if tool_name.is_empty() {
                return Err(GatewayError::InvalidInput("tool: tool_name is required".into()));
            }
            if !parameters.is_object() {
                return Err(GatewayError::InvalidInput(
                    "tool: parameters must be an object".into(),
                ));
            }
            let params_json = canonical_json(parameters);
            Ok(format!("{}:{}:{}", tool_name, params_json, version))
        }
        CanonicalRequest::Db {
            query,
            params,
            schema_version,
        } => {
            if query.is_empty() {
                return Err(GatewayError::InvalidInput("db: query is required".into()));
            }
            let params_json = params.as_ref().map(canonical_json).unwrap_or_default();
            let schema = schema_version.clone().unwrap_or_default();
            Ok(format!("{}:{}:{}", query, params_json, schema))
        }
    }
}
