//! Cache key derivation for remote operations.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derive a cache key from an operation identity and its parameters.
///
/// The identity prefix stays readable in the output so pattern invalidation
/// (e.g. `*productos*`) can target a resource family across derived keys.
/// Parameters are hashed: serde_json objects serialize with sorted keys, so
/// two parameter sets that are equal up to insertion order produce the same
/// key.
pub fn derive_key(identity: &str, params: Option<&Value>) -> String {
  let canonical = match params {
    Some(v) => v.to_string(),
    None => String::new(),
  };

  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  let digest = hex::encode(hasher.finalize());

  // 16 hex chars is plenty to keep distinct parameter sets apart
  format!("{}:{}", identity, &digest[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_same_identity_same_params() {
    let a = derive_key("productos:detail", Some(&json!({"id": 7})));
    let b = derive_key("productos:detail", Some(&json!({"id": 7})));
    assert_eq!(a, b);
  }

  #[test]
  fn test_key_insertion_order_is_irrelevant() {
    let mut first = serde_json::Map::new();
    first.insert("term".into(), json!("cafe"));
    first.insert("limit".into(), json!(20));

    let mut second = serde_json::Map::new();
    second.insert("limit".into(), json!(20));
    second.insert("term".into(), json!("cafe"));

    let a = derive_key("productos:search", Some(&Value::Object(first)));
    let b = derive_key("productos:search", Some(&Value::Object(second)));
    assert_eq!(a, b);
  }

  #[test]
  fn test_different_params_differ() {
    let a = derive_key("productos:detail", Some(&json!({"id": 7})));
    let b = derive_key("productos:detail", Some(&json!({"id": 8})));
    assert_ne!(a, b);
  }

  #[test]
  fn test_identity_is_visible_in_key() {
    let key = derive_key("pedidos:list", None);
    assert!(key.starts_with("pedidos:list:"));
  }

  #[test]
  fn test_no_params_differs_from_empty_object() {
    let a = derive_key("pedidos:list", None);
    let b = derive_key("pedidos:list", Some(&json!({})));
    assert_ne!(a, b);
  }
}
