use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

/// One raw schema configuration together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSchemaEntry {
    pub path: Option<PathBuf>,
    pub config: JsonValue,
}

impl RawSchemaEntry {
    pub fn new(config: JsonValue) -> Self {
        Self { path: None, config }
    }

    pub fn from_path(path: impl Into<PathBuf>, config: JsonValue) -> Self {
        Self {
            path: Some(path.into()),
            config,
        }
    }

    /// Entity id: the `id` key when present, else the originating file stem.
    pub fn entity_id(&self) -> Option<String> {
        if let Some(id) = self.config.get("id").and_then(JsonValue::as_str) {
            return Some(id.to_string());
        }
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
    }
}

/// Raw property object as authored. Unknown keys (presentation hints) are
/// tolerated and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProperty {
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub index: bool,
    pub max_length: Option<usize>,
    pub properties: Option<JsonValue>,
    pub items: Option<JsonValue>,
    pub relationship: Option<String>,
    pub target: Option<String>,
    pub through: Option<String>,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub expression: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}
