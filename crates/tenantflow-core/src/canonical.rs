//! Canonical JSON encoding and idempotency key derivation
//!
//! Logically identical requests must hash to the same key, so object keys are
//! sorted and numbers are written in one normal form before hashing.

use serde_json::{Number, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::fmt;

/// Encode `value` canonically: sorted object keys, normalised numbers, no whitespace.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => write_number(n, out),
        JsonValue::String(s) => write_string(s, out),
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        // f64 Display has no exponent and drops a zero fraction, so 1.0 and 1 agree.
        if f == 0.0 {
            out.push('0');
        } else {
            out.push_str(&f.to_string());
        }
    } else {
        out.push_str(&n.to_string());
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(encoded) => out.push_str(&encoded),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// Hex encoded SHA-256 identifying one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive a key from the tenant, operation name and canonicalised input.
    pub fn derive(tenant_id: &str, operation_name: &str, input: &JsonValue) -> Self {
        let material = canonical_json(&JsonValue::Array(vec![
            JsonValue::String(tenant_id.to_string()),
            JsonValue::String(operation_name.to_string()),
            input.clone(),
        ]));
        let digest = Sha256::digest(material.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let a: JsonValue = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[{"k":1,"j":2}]}}"#).unwrap();
        assert_eq!(canonical_json(&a), r#"{"a":{"x":[{"j":2,"k":1}],"y":2},"b":1}"#);
    }

    #[test]
    fn numbers_are_normalised() {
        let a: JsonValue = serde_json::from_str(r#"{"n":1.0,"m":-0.0,"f":2.50,"e":1e2}"#).unwrap();
        assert_eq!(canonical_json(&a), r#"{"e":100,"f":2.5,"m":0,"n":1}"#);
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(canonical_json(&json!("a\"b\n")), r#""a\"b\n""#);
    }

    #[test]
    fn key_order_does_not_change_the_key() {
        let a: JsonValue =
            serde_json::from_str(r#"{"budget":100,"campaign":{"name":"spring","geo":["US","CA"]}}"#)
                .unwrap();
        let b: JsonValue =
            serde_json::from_str(r#"{"campaign":{"geo":["US","CA"],"name":"spring"},"budget":100.0}"#)
                .unwrap();
        assert_eq!(
            IdempotencyKey::derive("acme", "send_campaign", &a),
            IdempotencyKey::derive("acme", "send_campaign", &b)
        );
    }

    #[test]
    fn tenant_and_operation_are_part_of_the_key() {
        let input = json!({"x": 1});
        let base = IdempotencyKey::derive("acme", "send_campaign", &input);
        assert_ne!(base, IdempotencyKey::derive("globex", "send_campaign", &input));
        assert_ne!(base, IdempotencyKey::derive("acme", "pause_campaign", &input));
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(
            IdempotencyKey::derive("t", "op", &json!([1, 2])),
            IdempotencyKey::derive("t", "op", &json!([2, 1]))
        );
    }
}
