//! Deterministic JSON canonicalization
//!
//! Two requests that differ only in object key order, insignificant
//! whitespace, or float formatting must produce the same canonical text.
//! Objects are re-serialized with sorted keys at every depth and numbers are
//! normalized to a fixed precision.

use serde_json::Value;

/// Decimal places kept when normalizing non-integer numbers
const FLOAT_PRECISION: usize = 4;

/// Render a JSON value in canonical form: sorted keys, no whitespace,
/// fixed-precision numbers.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => {
            // serde_json handles escaping; a String value cannot fail
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Normalize a JSON number to canonical text
///
/// Integers render as-is; everything else is clamped to [`FLOAT_PRECISION`]
/// decimal places with trailing zeros stripped, so `0.70`, `0.7000`, and
/// `0.7` all canonicalize identically.
pub fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    canonical_float(f)
}

/// Fixed-precision float normalization shared with temperature handling
pub fn canonical_float(f: f64) -> String {
    let fixed = format!("{:.*}", FLOAT_PRECISION, f);
    let trimmed = fixed.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
