//! Payload checksums for integrity and idempotent replay.
//!
//! The checksum covers the payload fields only (never status, version or
//! timestamps), so it can always be recomputed from the payload alone.
//! Payloads are first encoded canonically: object keys sorted, no
//! insignificant whitespace. Two equal payloads hash the same regardless of
//! the field order they were built or parsed in.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::{InvoicePayload, Record};

/// Compute the SHA256 checksum of a payload as 64 lowercase hex chars.
///
/// # Panics
///
/// Panics if the payload cannot be converted to JSON. This should never
/// happen for `InvoicePayload`, whose maps all have string keys.
#[must_use]
pub fn compute_checksum(payload: &InvoicePayload) -> String {
    content_hash(payload)
}

/// Compute a canonical SHA256 hash of any serializable value.
///
/// # Panics
///
/// Panics if the value cannot be serialized to JSON.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let value = serde_json::to_value(value).expect("serialization should not fail");
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recompute a record's checksum and compare it with the stored one.
///
/// # Errors
///
/// Returns [`Error::Integrity`] on mismatch. That means the row was
/// corrupted or tampered with; it is never treated as a conflict.
pub fn verify(record: &Record) -> Result<()> {
    let actual = compute_checksum(&record.payload);
    if actual == record.checksum {
        Ok(())
    } else {
        Err(Error::Integrity {
            id: record.id.clone(),
            expected: record.checksum.clone(),
            actual,
        })
    }
}

/// Check if content has changed relative to a stored hash.
///
/// Returns `true` when there is no stored hash or the hashes differ.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}

/// Encode a JSON value with sorted object keys and no whitespace.
///
/// Independent of whether `serde_json` was built with `preserve_order`.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string can't fail
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
    use crate::model::{ClientData, LineItem};

    fn payload() -> InvoicePayload {
        InvoicePayload::new(
            "INV-20250120",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: "1 Road".into(),
            },
            vec![LineItem {
                key: "k1".into(),
                number: 1,
                description: "Widgets".into(),
                amount: 2,
                price: 500,
            }],
        )
    }

    #[test]
    fn test_checksum_deterministic() {
        let hash1 = compute_checksum(&payload());
        let hash2 = compute_checksum(&payload());
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_checksum_independent_of_field_order() {
        let a = r#"{"invoice_number":"INV-20250120","invoice_date":"2025-01-20",
            "client":{"name":"Acme","address":"1 Road"},
            "line_items":[{"key":"k1","number":1,"description":"Widgets","amount":2,"price":500}],
            "total_amount":1000}"#;
        let b = r#"{"total_amount":1000,
            "line_items":[{"price":500,"amount":2,"description":"Widgets","number":1,"key":"k1"}],
            "client":{"address":"1 Road","name":"Acme"},
            "invoice_date":"2025-01-20","invoice_number":"INV-20250120"}"#;

        let pa: InvoicePayload = serde_json::from_str(a).unwrap();
        let pb: InvoicePayload = serde_json::from_str(b).unwrap();
        assert_eq!(compute_checksum(&pa), compute_checksum(&pb));
        assert_eq!(compute_checksum(&pa), compute_checksum(&payload()));

        let va: Value = serde_json::from_str(a).unwrap();
        let vb: Value = serde_json::from_str(b).unwrap();
        assert_eq!(canonical_json(&va), canonical_json(&vb));
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let mut changed = payload();
        changed.client.name = "Acme Ltd".into();
        assert_ne!(compute_checksum(&payload()), compute_checksum(&changed));
    }

    #[test]
    fn test_canonical_json_has_no_whitespace_and_sorted_keys() {
        let value = serde_json::json!({"b": 1, "a": {"d": [1, 2], "c": "x y"}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":"x y","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut record = Record::new(payload());
        assert!(verify(&record).is_ok());

        record.payload.total_amount = 1;
        let err = verify(&record).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_has_changed() {
        assert!(has_changed("abc123", None));
        assert!(has_changed("abc123", Some("xyz789")));
        assert!(!has_changed("abc123", Some("abc123")));
    }
}
