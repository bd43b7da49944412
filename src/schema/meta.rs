//! Kind-specific meta validation of raw schema configs.
//!
//! Runs before property compilation and reports every shape problem of the
//! entry at once.

use super::types::EntityKind;
use serde_json::Value as JsonValue;

/// Checks the top-level keys of a raw config for the given entity kind.
pub struct MetaValidator {
    kind: EntityKind,
}

impl MetaValidator {
    pub fn for_kind(kind: EntityKind) -> Self {
        Self { kind }
    }

    /// Returns every problem found; an empty list means the config is valid.
    pub fn validate(&self, config: &JsonValue) -> Vec<String> {
        let mut problems = Vec::new();

        let Some(map) = config.as_object() else {
            problems.push("schema config must be an object".to_string());
            return problems;
        };

        required_string(map, "name", &mut problems);

        if self.kind.is_relational() {
            required_string(map, "collectiveName", &mut problems);
            required_string(map, "files", &mut problems);
        } else {
            optional_string(map, "collectiveName", &mut problems);
            optional_string(map, "files", &mut problems);
        }

        optional_string(map, "description", &mut problems);
        optional_string(map, "icon", &mut problems);

        match map.get("properties") {
            None | Some(JsonValue::Object(_)) => {}
            Some(_) => problems.push("'properties' must be an object".to_string()),
        }

        problems
    }
}

fn required_string(map: &serde_json::Map<String, JsonValue>, key: &str, problems: &mut Vec<String>) {
    match map.get(key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => {}
        Some(JsonValue::String(_)) => problems.push(format!("'{key}' must not be empty")),
        Some(_) => problems.push(format!("'{key}' must be a string")),
        None => problems.push(format!("'{key}' is required")),
    }
}

fn optional_string(map: &serde_json::Map<String, JsonValue>, key: &str, problems: &mut Vec<String>) {
    match map.get(key) {
        None | Some(JsonValue::Null) | Some(JsonValue::String(_)) => {}
        Some(_) => problems.push(format!("'{key}' must be a string")),
    }
}
