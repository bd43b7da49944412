//! Declarative validation schemas for raw instance documents.
//!
//! Each compiled entity gets one [`ValidationSchema`]. Associations are
//! flattened to identifier shapes: `BelongsTo` becomes an id string,
//! `BelongsToMany` an array of ids. `HasOne`/`HasMany` have no serialized
//! form on the owning side and are left out. Virtual properties are never
//! part of a document.

use super::types::{AssociationKind, PropertyDefinition, ScalarType, SchemaDefinition};
use crate::error::ValidationFailure;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Pattern every instance id must match.
pub const ID_PATTERN: &str = "^[A-Za-z0-9][A-Za-z0-9_-]*$";

#[derive(Debug, Clone)]
pub enum ValidationRule {
    String {
        enum_values: Option<Vec<JsonValue>>,
        max_length: Option<usize>,
        pattern: Option<Regex>,
    },
    Integer {
        enum_values: Option<Vec<JsonValue>>,
    },
    Number {
        enum_values: Option<Vec<JsonValue>>,
    },
    Boolean,
    Object,
    Array,
    IdRef,
    IdRefList {
        min: Option<u32>,
        max: Option<u32>,
    },
}

impl PartialEq for ValidationRule {
    fn eq(&self, other: &Self) -> bool {
        use ValidationRule::*;
        match (self, other) {
            (
                String {
                    enum_values: a,
                    max_length: b,
                    pattern: c,
                },
                String {
                    enum_values: x,
                    max_length: y,
                    pattern: z,
                },
            ) => a == x && b == y && c.as_ref().map(Regex::as_str) == z.as_ref().map(Regex::as_str),
            (Integer { enum_values: a }, Integer { enum_values: b }) => a == b,
            (Number { enum_values: a }, Number { enum_values: b }) => a == b,
            (IdRefList { min: a, max: b }, IdRefList { min: x, max: y }) => a == x && b == y,
            (Boolean, Boolean) | (Object, Object) | (Array, Array) | (IdRef, IdRef) => true,
            _ => false,
        }
    }
}

impl ValidationRule {
    fn check(&self, field: &str, value: &JsonValue, errors: &mut Vec<String>) {
        match self {
            ValidationRule::String {
                enum_values,
                max_length,
                pattern,
            } => {
                let Some(s) = value.as_str() else {
                    errors.push(format!("'{}' must be a string", field));
                    return;
                };
                if let Some(max) = max_length {
                    if s.chars().count() > *max {
                        errors.push(format!("'{}' must be at most {} characters", field, max));
                    }
                }
                if let Some(re) = pattern {
                    if !re.is_match(s) {
                        errors.push(format!("'{}' must match pattern {}", field, re.as_str()));
                    }
                }
                check_enum(field, value, enum_values, errors);
            }
            ValidationRule::Integer { enum_values } => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    errors.push(format!("'{}' must be an integer", field));
                    return;
                }
                check_enum(field, value, enum_values, errors);
            }
            ValidationRule::Number { enum_values } => {
                if !value.is_number() {
                    errors.push(format!("'{}' must be a number", field));
                    return;
                }
                check_enum(field, value, enum_values, errors);
            }
            ValidationRule::Boolean => {
                if !value.is_boolean() {
                    errors.push(format!("'{}' must be a boolean", field));
                }
            }
            ValidationRule::Object => {
                if !value.is_object() {
                    errors.push(format!("'{}' must be an object", field));
                }
            }
            ValidationRule::Array => {
                if !value.is_array() {
                    errors.push(format!("'{}' must be an array", field));
                }
            }
            ValidationRule::IdRef => check_id(field, value, errors),
            ValidationRule::IdRefList { min, max } => {
                let Some(items) = value.as_array() else {
                    errors.push(format!("'{}' must be an array of ids", field));
                    return;
                };
                for (i, item) in items.iter().enumerate() {
                    check_id(&format!("{}[{}]", field, i), item, errors);
                }
                if let Some(min) = min {
                    if items.len() < *min as usize {
                        errors.push(format!("'{}' must have at least {} item(s)", field, min));
                    }
                }
                if let Some(max) = max {
                    if items.len() > *max as usize {
                        errors.push(format!("'{}' must have at most {} item(s)", field, max));
                    }
                }
            }
        }
    }

    fn to_json_schema(&self) -> JsonValue {
        match self {
            ValidationRule::String {
                enum_values,
                max_length,
                pattern,
            } => {
                let mut out = Map::new();
                out.insert("type".into(), json!("string"));
                if let Some(values) = enum_values {
                    out.insert("enum".into(), json!(values));
                }
                if let Some(max) = max_length {
                    out.insert("maxLength".into(), json!(max));
                }
                if let Some(re) = pattern {
                    out.insert("pattern".into(), json!(re.as_str()));
                }
                JsonValue::Object(out)
            }
            ValidationRule::Integer { enum_values } => typed_with_enum("integer", enum_values),
            ValidationRule::Number { enum_values } => typed_with_enum("number", enum_values),
            ValidationRule::Boolean => json!({"type": "boolean"}),
            ValidationRule::Object => json!({"type": "object"}),
            ValidationRule::Array => json!({"type": "array"}),
            ValidationRule::IdRef => json!({"type": "string", "pattern": ID_PATTERN}),
            ValidationRule::IdRefList { min, max } => {
                let mut out = Map::new();
                out.insert("type".into(), json!("array"));
                out.insert("items".into(), json!({"type": "string", "pattern": ID_PATTERN}));
                if let Some(min) = min {
                    out.insert("minItems".into(), json!(min));
                }
                if let Some(max) = max {
                    out.insert("maxItems".into(), json!(max));
                }
                JsonValue::Object(out)
            }
        }
    }
}

fn typed_with_enum(type_name: &str, enum_values: &Option<Vec<JsonValue>>) -> JsonValue {
    match enum_values {
        Some(values) => json!({"type": type_name, "enum": values}),
        None => json!({"type": type_name}),
    }
}

fn check_enum(field: &str, value: &JsonValue, enum_values: &Option<Vec<JsonValue>>, errors: &mut Vec<String>) {
    if let Some(allowed) = enum_values {
        if !allowed.contains(value) {
            errors.push(format!("'{}' must be one of {}", field, JsonValue::from(allowed.clone())));
        }
    }
}

fn check_id(field: &str, value: &JsonValue, errors: &mut Vec<String>) {
    match value.as_str() {
        Some(s) if is_valid_id(s) => {}
        Some(s) => errors.push(format!("'{}' is not a valid id: '{}'", field, s)),
        None => errors.push(format!("'{}' must be an id string", field)),
    }
}

static ID_REGEX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(ID_PATTERN).ok());

/// Whether `id` is a well-formed instance id (matches [`ID_PATTERN`]).
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

/// Declarative validation schema for one entity's instance documents.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSchema {
    pub entity: String,
    pub rules: IndexMap<String, ValidationRule>,
    pub required: Vec<String>,
}

impl ValidationSchema {
    /// Derives the validation schema of a compiled definition.
    pub fn from_definition(definition: &SchemaDefinition) -> Self {
        let mut rules = IndexMap::new();
        let mut required = Vec::new();

        for (name, prop) in &definition.properties {
            let rule = match prop {
                PropertyDefinition::Scalar(scalar) => match scalar.scalar_type {
                    ScalarType::String => ValidationRule::String {
                        enum_values: scalar.enum_values.clone(),
                        max_length: scalar.max_length,
                        pattern: if name == "id" { ID_REGEX.clone() } else { None },
                    },
                    ScalarType::Integer => ValidationRule::Integer {
                        enum_values: scalar.enum_values.clone(),
                    },
                    ScalarType::Number => ValidationRule::Number {
                        enum_values: scalar.enum_values.clone(),
                    },
                    ScalarType::Boolean => ValidationRule::Boolean,
                },
                PropertyDefinition::Object(_) => ValidationRule::Object,
                PropertyDefinition::Array(_) => ValidationRule::Array,
                PropertyDefinition::Association(assoc) => match assoc.kind {
                    AssociationKind::BelongsTo => {
                        if assoc.min.unwrap_or(0) >= 1 {
                            required.push(name.clone());
                        }
                        ValidationRule::IdRef
                    }
                    AssociationKind::BelongsToMany => ValidationRule::IdRefList {
                        min: assoc.min,
                        max: assoc.max,
                    },
                    AssociationKind::HasOne | AssociationKind::HasMany => continue,
                },
                PropertyDefinition::Virtual(_) => continue,
            };
            if name == "id" {
                required.insert(0, name.clone());
            }
            rules.insert(name.clone(), rule);
        }

        Self {
            entity: definition.id.clone(),
            rules,
            required,
        }
    }

    /// Validates a raw instance document, collecting every problem.
    ///
    /// Null is accepted for any non-required property. Keys without a rule
    /// are left alone.
    pub fn validate(&self, instance: &JsonValue) -> Result<(), ValidationFailure> {
        let mut errors = Vec::new();

        let Some(map) = instance.as_object() else {
            return Err(ValidationFailure {
                entity: self.entity.clone(),
                errors: vec!["instance must be an object".to_string()],
            });
        };

        for field in &self.required {
            match map.get(field) {
                None | Some(JsonValue::Null) => errors.push(format!("'{}' is required", field)),
                Some(_) => {}
            }
        }

        for (field, rule) in &self.rules {
            match map.get(field) {
                None | Some(JsonValue::Null) => {}
                Some(value) => rule.check(field, value, &mut errors),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                entity: self.entity.clone(),
                errors,
            })
        }
    }

    /// Renders the schema as a JSON Schema document.
    pub fn to_json_schema(&self) -> JsonValue {
        let properties: Map<String, JsonValue> = self
            .rules
            .iter()
            .map(|(name, rule)| (name.clone(), rule.to_json_schema()))
            .collect();
        json!({
            "$id": self.entity,
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Entity id to validation schema, rebuilt from empty on every reload.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    version: u64,
    fingerprint: String,
    validators: HashMap<String, Arc<ValidationSchema>>,
}

impl ValidatorRegistry {
    pub fn new(version: u64, fingerprint: impl Into<String>) -> Self {
        Self {
            version,
            fingerprint: fingerprint.into(),
            validators: HashMap::new(),
        }
    }

    /// Builds a registry from compiled schemas. `fingerprint` identifies the
    /// raw inputs they were compiled from.
    pub fn from_schemas(
        version: u64,
        fingerprint: impl Into<String>,
        schemas: impl IntoIterator<Item = ValidationSchema>,
    ) -> Self {
        let mut registry = Self::new(version, fingerprint);
        for schema in schemas {
            registry.insert(schema);
        }
        registry
    }

    pub fn insert(&mut self, schema: ValidationSchema) {
        self.validators.insert(schema.entity.clone(), Arc::new(schema));
    }

    pub fn get(&self, entity: &str) -> Option<Arc<ValidationSchema>> {
        self.validators.get(entity).cloned()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &String> {
        self.validators.keys()
    }
}
