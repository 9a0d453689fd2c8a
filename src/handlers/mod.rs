//! Request handlers
//!
//! The externally visible operation surface: typed request schemas with
//! validation, and response shaping. Each cache kind exposes GET/CHECK,
//! SET, and INVALIDATE; analytics exposes a window read. The transport
//! that carries these (HTTP or otherwise) is out of scope; handlers take
//! and return plain serde types.

pub mod requests;
pub mod responses;

pub use requests::{
    AnalyticsRequest, DbGetRequest, DbSetRequest, InvalidateRequest, LlmGetRequest, LlmSetRequest,
    ToolGetRequest, ToolSetRequest,
};
pub use responses::{CacheReadResponse, ErrorBody, InvalidateResponse, StoreResponse};

use serde_json::Value;

/// Render an arbitrary JSON payload into the stored string form
///
/// Strings are stored raw (no extra quoting); everything else is stored as
/// compact JSON. The engine never interprets the result.
pub fn value_to_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reverse of [`value_to_payload`] for response shaping: parse when the
/// payload is JSON, fall back to the raw string
pub fn payload_to_value(payload: &str, parsed: Option<Value>) -> Value {
    parsed.unwrap_or_else(|| Value::String(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_payload_stored_raw() {
        assert_eq!(value_to_payload(&json!("hello")), "hello");
    }

    #[test]
    fn test_object_payload_stored_as_json() {
        let payload = value_to_payload(&json!({"temp": 65}));
        assert_eq!(payload, r#"{"temp":65}"#);
    }

    #[test]
    fn test_payload_to_value_round_trip() {
        let value = json!({"a": 1});
        let payload = value_to_payload(&value);
        let back = payload_to_value(&payload, serde_json::from_str(&payload).ok());
        assert_eq!(back, value);

        let raw = payload_to_value("plain text", None);
        assert_eq!(raw, json!("plain text"));
    }
}
