use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical serialization of normalized parameters: serde_json's object map
/// is BTreeMap-backed, so keys serialize sorted and numbers render minimally.
pub fn canonical_json(normalized: &Value) -> String {
    normalized.to_string()
}

/// Stable hex digest identifying a normalized parameter set.
pub fn params_hash(normalized: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(normalized).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"min_score": 70, "period": "2y"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"period": "2y", "min_score": 70}"#).unwrap();
        assert_eq!(params_hash(&a), params_hash(&b));
    }

    #[test]
    fn hash_distinguishes_values() {
        let a: Value = serde_json::from_str(r#"{"min_score": 70}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"min_score": 71}"#).unwrap();
        assert_ne!(params_hash(&a), params_hash(&b));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let v: Value = serde_json::from_str("{}").unwrap();
        let h = params_hash(&v);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
