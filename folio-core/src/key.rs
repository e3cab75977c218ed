//! Deterministic cache keys.
//!
//! A key has the shape `<type-prefix><id>[_<params-hash>]`. The params hash
//! is the first 8 hex characters of the SHA-256 of the canonical JSON
//! encoding of the parameter map, with object keys sorted at every level.
//! Two parameter maps holding the same pairs therefore produce the same key
//! regardless of insertion order.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Number of digest bytes kept in the params hash (8 hex characters).
const PARAMS_HASH_BYTES: usize = 4;

/// An opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// A key without parameters: `<type-prefix><id>`.
    pub fn new(type_prefix: &str, id: &str) -> Self {
        Self(format!("{}{}", type_prefix, id))
    }

    /// A key for `id` under `type_prefix`, qualified by request parameters.
    ///
    /// An empty parameter set yields the same key as [`CacheKey::new`].
    /// Duplicate parameter names keep the last value.
    pub fn generate<I, K, V>(type_prefix: &str, id: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let params: BTreeMap<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        match params_hash(&params) {
            Some(hash) => Self(format!("{}{}_{}", type_prefix, id, hash)),
            None => Self::new(type_prefix, id),
        }
    }

    /// Wrap an existing key string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Hash of the canonical encoding of `params`, or `None` when empty.
fn params_hash(params: &BTreeMap<String, Value>) -> Option<String> {
    if params.is_empty() {
        return None;
    }

    let object: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
    let canonical = Value::Object(object).to_string();

    let digest = Sha256::digest(canonical.as_bytes());
    Some(hex::encode(&digest[..PARAMS_HASH_BYTES]))
}

/// Rebuild a JSON value with every object's keys in sorted order.
///
/// `serde_json::Map` only sorts when the `preserve_order` feature is off, and
/// that feature can be switched on by any crate in the dependency graph.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_without_params() {
        let key = CacheKey::new("book_", "42");
        assert_eq!(key.as_str(), "book_42");

        let empty: Vec<(String, Value)> = Vec::new();
        assert_eq!(CacheKey::generate("book_", "42", empty), key);
    }

    #[test]
    fn test_key_with_params_has_hash_suffix() {
        let key = CacheKey::generate("chapters_", "42", [("lang", "en")]);
        let s = key.as_str();
        assert!(s.starts_with("chapters_42_"));

        let hash = &s["chapters_42_".len()..];
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = CacheKey::generate("q_", "1", [("a", json!(1)), ("b", json!("x"))]);
        let b = CacheKey::generate("q_", "1", [("b", json!("x")), ("a", json!(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = CacheKey::generate("q_", "1", [("filter", json!({"z": 1, "a": 2}))]);
        let b = CacheKey::generate("q_", "1", [("filter", json!({"a": 2, "z": 1}))]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_params_distinct_keys() {
        let a = CacheKey::generate("q_", "1", [("page", 1)]);
        let b = CacheKey::generate("q_", "1", [("page", 2)]);
        let c = CacheKey::generate("q_", "1", [("page", "1")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_matches_sha256_of_sorted_json() {
        let key = CacheKey::generate("q_", "1", [("b", 2), ("a", 1)]);
        let digest = Sha256::digest(br#"{"a":1,"b":2}"#);
        let expected = format!("q_1_{}", hex::encode(&digest[..4]));
        assert_eq!(key.as_str(), expected);
    }

    // ========================================================================
    // Property-Based Tests
    // ========================================================================

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        fn params_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
            prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            /// Property: any permutation of the same pairs yields the same key.
            #[test]
            fn prop_key_is_order_independent(
                params in params_strategy(),
                seed in any::<u64>(),
            ) {
                let forward: Vec<(String, i64)> = params.clone().into_iter().collect();
                let mut shuffled = forward.clone();
                // Deterministic shuffle driven by the seed.
                let len = shuffled.len();
                if len > 1 {
                    let mut s = seed;
                    for i in (1..len).rev() {
                        s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        let j = (s % (i as u64 + 1)) as usize;
                        shuffled.swap(i, j);
                    }
                }

                let a = CacheKey::generate("book_", "7", forward);
                let b = CacheKey::generate("book_", "7", shuffled);
                prop_assert_eq!(a, b);
            }

            /// Property: changing one value changes the key.
            #[test]
            fn prop_value_change_changes_key(
                params in params_strategy().prop_filter("non-empty", |p| !p.is_empty()),
            ) {
                let original = CacheKey::generate("book_", "7", params.clone());

                let mut changed = params.clone();
                if let Some((_, v)) = changed.iter_mut().next() {
                    *v = v.wrapping_add(1);
                }
                let altered = CacheKey::generate("book_", "7", changed);
                prop_assert_ne!(original, altered);
            }
        }
    }
}
