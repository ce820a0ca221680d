//! Canonical JSON serialization and parameter fingerprints.
//!
//! Model-supplied parameters arrive as free-form JSON whose key order and
//! whitespace vary between otherwise identical calls. The loop detector
//! needs semantically-equal payloads to hash equally, so identity is taken
//! over a canonical form: keys sorted at every object level, no whitespace.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value canonically: object keys sorted at every level,
/// no insignificant whitespace.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Hex SHA-256 digest of the canonical serialization.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hasher.update(canonical_string(value).as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles string escaping for the key.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_level() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_string(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a: Value = serde_json::from_str(r#"{"city": "Paris", "units": "c"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "units":"c",  "city":"Paris" }"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_values_change_fingerprint() {
        let a = json!({"city": "Paris"});
        let b = json!({"city": "Lyon"});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn arrays_preserve_order() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_eq!(canonical_string(&a), "[1,2,3]");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn escapes_strings_like_serde() {
        let v = json!({"note": "line\nbreak \"quoted\""});
        let canonical = canonical_string(&v);
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(reparsed, v);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(canonical_string(&json!(null)), "null");
        assert_eq!(canonical_string(&json!(true)), "true");
        assert_eq!(canonical_string(&json!(1.5)), "1.5");
    }
}
