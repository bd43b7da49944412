use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Content fingerprints for schema sets.
///
/// The hash covers canonical JSON (object keys sorted at every depth), so
/// authoring order and whitespace never change it.
pub struct SchemaHasher;

impl SchemaHasher {
    /// SHA-256 of the canonical JSON form, as lowercase hex.
    pub fn fingerprint(value: &Value) -> String {
        let canonical = Self::to_canonical_json(value);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fingerprint of a whole set of raw configs, independent of their order.
    pub fn fingerprint_all<'a>(configs: impl IntoIterator<Item = &'a Value>) -> String {
        let mut canonical: Vec<String> = configs.into_iter().map(Self::to_canonical_json).collect();
        canonical.sort();

        let mut hasher = Sha256::new();
        for entry in &canonical {
            hasher.update(entry.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    fn to_canonical_json(value: &Value) -> String {
        Self::sort_keys(value).to_string()
    }

    fn sort_keys(value: &Value) -> Value {
        match value {
            Value::Object(obj) => {
                let mut keys: Vec<&String> = obj.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    if let Some(v) = obj.get(key) {
                        sorted.insert(key.clone(), Self::sort_keys(v));
                    }
                }
                Value::Object(sorted)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sort_keys).collect()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = json!({"name": "Task", "properties": {"a": 1, "b": 2}});
        let b = json!({"properties": {"b": 2, "a": 1}, "name": "Task"});
        assert_eq!(SchemaHasher::fingerprint(&a), SchemaHasher::fingerprint(&b));
        assert_eq!(SchemaHasher::fingerprint(&a).len(), 64);
    }

    #[test]
    fn content_change_changes_fingerprint() {
        let a = json!({"name": "Task"});
        let b = json!({"name": "Tasks"});
        assert_ne!(SchemaHasher::fingerprint(&a), SchemaHasher::fingerprint(&b));
    }

    #[test]
    fn set_fingerprint_ignores_entry_order() {
        let a = json!({"id": "a"});
        let b = json!({"id": "b"});
        assert_eq!(
            SchemaHasher::fingerprint_all([&a, &b]),
            SchemaHasher::fingerprint_all([&b, &a])
        );
    }
}
