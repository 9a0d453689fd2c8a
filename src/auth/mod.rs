//! API key authentication and tenancy
//!
//! Keys come in two families: `ac_demo_*` (anonymous, quota-free, sandboxed
//! to demo namespaces) and `ac_live_*` (provisioned, digest-looked-up,
//! quota-bearing). Keys are never stored raw: the gateway keys everything
//! off the SHA-256 digest of the presented credential. Namespaces are
//! validated before they are embedded into structured cache keys, so a
//! hostile namespace can never widen a key pattern.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RateLimitConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::kv::KvStore;

/// Demo key prefix
pub const DEMO_PREFIX: &str = "ac_demo_";
/// Live key prefix
pub const LIVE_PREFIX: &str = "ac_live_";
/// Namespace applied when the caller supplies none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Key family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Anonymous demo key
    Demo,
    /// Provisioned live key
    Live,
}

/// Billing tier attached to a live key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Demo and unpaid keys
    Free,
    /// Paid tier
    Pro,
    /// Contract tier
    Enterprise,
}

impl Tier {
    fn parse(s: &str) -> Self {
        match s {
            "pro" => Self::Pro,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }

    /// Lowercase label stored in key records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Authenticated caller identity
#[derive(Debug, Clone)]
pub struct Principal {
    /// Key family
    pub kind: KeyKind,
    /// Tenant digest; demo principals have none
    pub digest: Option<String>,
    /// Sliding-window identity: SHA-256 of the presented credential
    pub rate_identity: String,
    /// Billing tier
    pub tier: Tier,
    /// Monthly quota; demo principals bypass quota entirely
    pub monthly_quota: Option<u64>,
}

impl Principal {
    /// Whether this is a demo principal
    pub fn is_demo(&self) -> bool {
        self.kind == KeyKind::Demo
    }

    /// Requests-per-minute ceiling for this principal
    pub fn rpm(&self, config: &RateLimitConfig) -> u64 {
        match self.kind {
            KeyKind::Demo => config.demo_rpm,
            KeyKind::Live => config.live_rpm,
        }
    }
}

/// Request headers the gateway consumes
///
/// The transport layer (out of scope here) extracts these from
/// `X-API-Key` / `Authorization: Bearer` / `X-Cache-Namespace`.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    /// `X-API-Key` value
    pub api_key: Option<String>,
    /// `Authorization: Bearer` token
    pub bearer: Option<String>,
    /// `X-Cache-Namespace` value
    pub namespace: Option<String>,
}

impl RequestHeaders {
    /// Build headers carrying only an API key
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Build headers carrying an API key and a namespace
    pub fn with_key_and_namespace(key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            bearer: None,
            namespace: Some(namespace.into()),
        }
    }

    /// The presented credential; `X-API-Key` wins over the bearer token
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().or(self.bearer.as_deref())
    }
}

/// SHA-256 of a credential, lowercase hex
pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Parse a credential's family and rate identity without any store lookup
///
/// The policy chain rate-limits before the auth lookup, so the limiter
/// needs an identity derivable from the credential alone.
pub fn parse_key(key: &str) -> GatewayResult<(KeyKind, String)> {
    if key.starts_with(DEMO_PREFIX) {
        Ok((KeyKind::Demo, key_digest(key)))
    } else if key.starts_with(LIVE_PREFIX) {
        Ok((KeyKind::Live, key_digest(key)))
    } else {
        let prefix: String = key.chars().take(8).collect();
        Err(GatewayError::BadKeyFormat(prefix))
    }
}

/// KV key holding a live key's metadata hash
pub fn apikey_record_key(digest: &str) -> String {
    format!("apikey:{}", digest)
}

/// Authenticator: key parsing plus digest-based record lookup
#[derive(Clone)]
pub struct Authenticator {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl Authenticator {
    /// Create an authenticator over the given KV store
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Authenticate the presented credential
    pub async fn authenticate(&self, headers: &RequestHeaders) -> GatewayResult<Principal> {
        let key = headers.credential().ok_or(GatewayError::MissingKey)?;

        if key.starts_with(DEMO_PREFIX) {
            // Demo fast path: no lookup, no quota; rate limiting still applies
            return Ok(Principal {
                kind: KeyKind::Demo,
                digest: None,
                rate_identity: key_digest(key),
                tier: Tier::Free,
                monthly_quota: None,
            });
        }

        if !key.starts_with(LIVE_PREFIX) {
            let prefix: String = key.chars().take(8).collect();
            return Err(GatewayError::BadKeyFormat(prefix));
        }

        let digest = key_digest(key);
        let record = self
            .kv
            .hgetall(&apikey_record_key(&digest))
            .await
            .map_err(GatewayError::from)?;
        let owner = record.get("owner").map(String::as_str).unwrap_or("");
        if owner.is_empty() {
            return Err(GatewayError::UnknownKey);
        }

        let tier = record
            .get("tier")
            .map(|t| Tier::parse(t))
            .unwrap_or(Tier::Free);
        let monthly_quota = record
            .get("monthly_quota")
            .and_then(|q| q.parse().ok())
            .unwrap_or(self.config.default_monthly_quota);

        Ok(Principal {
            kind: KeyKind::Live,
            digest: Some(digest.clone()),
            rate_identity: digest,
            tier,
            monthly_quota: Some(monthly_quota),
        })
    }

    /// Resolve and validate the namespace for this request
    ///
    /// Demo principals are confined to `default` and `demo*` namespaces so
    /// anonymous traffic cannot read or sweep live tenants.
    pub fn resolve_namespace(
        &self,
        headers: &RequestHeaders,
        principal: &Principal,
    ) -> GatewayResult<String> {
        let namespace = headers
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        validate_namespace(&namespace)?;

        if principal.is_demo() && namespace != DEFAULT_NAMESPACE && !namespace.starts_with("demo")
        {
            return Err(GatewayError::Forbidden(format!(
                "demo keys cannot access namespace {}",
                namespace
            )));
        }

        Ok(namespace)
    }

    /// Provision a live key record; used by tests and the demo binary
    ///
    /// Real provisioning is an external concern; this writes the same hash
    /// shape it would.
    pub async fn provision_live_key(
        &self,
        key: &str,
        owner: &str,
        tier: Tier,
        monthly_quota: u64,
    ) -> GatewayResult<String> {
        let digest = key_digest(key);
        let fields: Vec<(String, String)> = vec![
            ("owner".into(), owner.to_string()),
            ("tier".into(), tier.as_str().to_string()),
            ("monthly_quota".into(), monthly_quota.to_string()),
        ];
        self.kv
            .hset(&apikey_record_key(&digest), &fields)
            .await
            .map_err(GatewayError::from)?;
        Ok(digest)
    }
}

/// Namespace charset guard
///
/// Namespaces are embedded into structured keys between `:` separators;
/// `:`, `*`, and `?` would let a caller forge or widen key patterns, so
/// only `[A-Za-z0-9._-]` is allowed.
pub fn validate_namespace(namespace: &str) -> GatewayResult<()> {
    if namespace.is_empty() || namespace.len() > 64 {
        return Err(GatewayError::InvalidInput(
            "namespace must be 1-64 characters".into(),
        ));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(GatewayError::InvalidInput(format!(
            "namespace {} contains invalid characters",
            namespace
        )));
    }
    Ok(())
}

/// Shared guard for other key components (tags, db names, tool names…)
pub fn validate_key_component(label: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() || value.len() > 128 {
        return Err(GatewayError::InvalidInput(format!(
            "{} must be 1-128 characters",
            label
        )));
    }
    if value.contains(':') || value.contains('*') || value.contains('?') {
        return Err(GatewayError::InvalidInput(format!(
            "{} contains reserved characters",
            label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;

    fn authenticator() -> (Authenticator, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        let auth = Authenticator::new(kv.clone(), RateLimitConfig::default());
        (auth, kv)
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (auth, _) = authenticator();
        let err = auth
            .authenticate(&RequestHeaders::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "missing_key");
    }

    #[tokio::test]
    async fn test_bad_prefix() {
        let (auth, _) = authenticator();
        let err = auth
            .authenticate(&RequestHeaders::with_key("sk_test_123"))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "bad_key_format");
    }

    #[tokio::test]
    async fn test_demo_fast_path() {
        let (auth, _) = authenticator();
        let principal = auth
            .authenticate(&RequestHeaders::with_key("ac_demo_anything"))
            .await
            .unwrap();
        assert!(principal.is_demo());
        assert!(principal.digest.is_none());
        assert!(principal.monthly_quota.is_none());
        assert_eq!(principal.rate_identity.len(), 64);
    }

    #[tokio::test]
    async fn test_live_key_unknown() {
        let (auth, _) = authenticator();
        let err = auth
            .authenticate(&RequestHeaders::with_key("ac_live_unprovisioned"))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "unknown_key");
    }

    #[tokio::test]
    async fn test_live_key_lookup() {
        let (auth, _) = authenticator();
        let digest = auth
            .provision_live_key("ac_live_abc123", "dev@acme.test", Tier::Pro, 50_000)
            .await
            .unwrap();
        let principal = auth
            .authenticate(&RequestHeaders::with_key("ac_live_abc123"))
            .await
            .unwrap();
        assert_eq!(principal.kind, KeyKind::Live);
        assert_eq!(principal.digest.as_deref(), Some(digest.as_str()));
        assert_eq!(principal.tier, Tier::Pro);
        assert_eq!(principal.monthly_quota, Some(50_000));
    }

    #[tokio::test]
    async fn test_live_record_without_owner_is_unknown() {
        let (auth, kv) = authenticator();
        let digest = key_digest("ac_live_empty");
        kv.hset(&apikey_record_key(&digest), &[("tier".into(), "pro".into())])
            .await
            .unwrap();
        let err = auth
            .authenticate(&RequestHeaders::with_key("ac_live_empty"))
            .await
            .unwrap_err();
        assert_eq!(err.kind_str(), "unknown_key");
    }

    #[tokio::test]
    async fn test_namespace_default() {
        let (auth, _) = authenticator();
        let principal = auth
            .authenticate(&RequestHeaders::with_key("ac_demo_x"))
            .await
            .unwrap();
        let ns = auth
            .resolve_namespace(&RequestHeaders::with_key("ac_demo_x"), &principal)
            .unwrap();
        assert_eq!(ns, "default");
    }

    #[tokio::test]
    async fn test_demo_sandbox() {
        let (auth, _) = authenticator();
        let principal = auth
            .authenticate(&RequestHeaders::with_key("ac_demo_x"))
            .await
            .unwrap();
        let headers = RequestHeaders::with_key_and_namespace("ac_demo_x", "acme");
        let err = auth.resolve_namespace(&headers, &principal).unwrap_err();
        assert_eq!(err.kind_str(), "forbidden");

        let headers = RequestHeaders::with_key_and_namespace("ac_demo_x", "demo-playground");
        assert!(auth.resolve_namespace(&headers, &principal).is_ok());
    }

    #[tokio::test]
    async fn test_namespace_charset_rejected() {
        let (auth, _) = authenticator();
        auth.provision_live_key("ac_live_ns", "o@x.test", Tier::Free, 1000)
            .await
            .unwrap();
        let principal = auth
            .authenticate(&RequestHeaders::with_key("ac_live_ns"))
            .await
            .unwrap();
        let headers = RequestHeaders::with_key_and_namespace("ac_live_ns", "bad:ns*");
        let err = auth.resolve_namespace(&headers, &principal).unwrap_err();
        assert_eq!(err.kind_str(), "invalid_input");
    }

    #[test]
    fn test_key_digest_shape() {
        let digest = key_digest("ac_live_x");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, key_digest("ac_live_x"));
        assert_ne!(digest, key_digest("ac_live_y"));
    }

    #[test]
    fn test_validate_key_component() {
        assert!(validate_key_component("tag", "user-123").is_ok());
        assert!(validate_key_component("tag", "a:b").is_err());
        assert!(validate_key_component("tag", "a*").is_err());
        assert!(validate_key_component("tag", "").is_err());
    }
}
