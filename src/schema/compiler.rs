//! Schema compiler: raw config entries in, immutable definitions out.
//!
//! Every problem found in one entry is collected before the entry is
//! rejected, and [`SchemaCompiler::compile_all`] reports every failing entry
//! at once so an operator can fix a schema directory in one pass.

use super::hasher::SchemaHasher;
use super::meta::MetaValidator;
use super::types::{
    AssociationKind, AssociationProperty, EntityKind, PropertyDefinition, RawProperty,
    RawSchemaEntry, ScalarProperty, ScalarType, SchemaDefinition, StructuredProperty,
    VirtualProperty, RESERVED_PROPERTIES,
};
use super::validation::{is_valid_id, ValidationSchema, ValidatorRegistry};
use super::DEFAULT_RESERVED_MARKER;
use crate::error::{SchemaCompileError, SchemaCompileErrors};
use crate::expression::CompiledExpression;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Output of compiling one raw entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    pub definition: SchemaDefinition,
    pub validation: ValidationSchema,
}

/// Output of compiling a full set of entries for one registry generation.
#[derive(Debug, Clone)]
pub struct CompiledSchemaSet {
    /// Definitions in input order
    pub definitions: Vec<SchemaDefinition>,
    pub validators: ValidatorRegistry,
}

#[derive(Debug, Clone)]
pub struct SchemaCompiler {
    reserved_marker: char,
}

impl Default for SchemaCompiler {
    fn default() -> Self {
        Self {
            reserved_marker: DEFAULT_RESERVED_MARKER,
        }
    }
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved_marker(reserved_marker: char) -> Self {
        Self { reserved_marker }
    }

    /// Compiles one raw entry.
    pub fn compile(&self, entry: &RawSchemaEntry) -> Result<CompiledSchema, SchemaCompileError> {
        let Some(entity) = entry.entity_id() else {
            return Err(SchemaCompileError::single(
                "<unnamed>",
                entry.path.clone(),
                "schema has neither an 'id' nor an originating path",
            ));
        };
        let fail = |problems: Vec<String>| SchemaCompileError::new(entity.clone(), entry.path.clone(), problems);

        let mut problems = Vec::new();

        if entity.starts_with(self.reserved_marker) {
            problems.push(format!(
                "entity id '{}' starts with the reserved marker '{}'",
                entity, self.reserved_marker
            ));
        } else if !is_valid_id(&entity) {
            problems.push(format!("entity id '{}' is not a valid identifier", entity));
        }

        let kind = match entry.config.get("type") {
            Some(JsonValue::String(raw)) => EntityKind::parse(raw).or_else(|| {
                problems.push(format!("unsupported entity type '{}'", raw));
                None
            }),
            Some(_) => {
                problems.push("'type' must be a string".to_string());
                None
            }
            None => {
                problems.push("'type' is required".to_string());
                None
            }
        };
        let Some(kind) = kind else {
            return Err(fail(problems));
        };

        problems.extend(MetaValidator::for_kind(kind).validate(&entry.config));
        if !problems.is_empty() {
            return Err(fail(problems));
        }

        let raw_properties = entry
            .config
            .get("properties")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        let mut properties: IndexMap<String, PropertyDefinition> = IndexMap::new();
        if kind.is_relational() {
            for reserved in RESERVED_PROPERTIES {
                if raw_properties.contains_key(reserved) {
                    problems.push(format!("property '{}' is reserved", reserved));
                }
                properties.insert(
                    reserved.to_string(),
                    PropertyDefinition::Scalar(ScalarProperty::new(ScalarType::String).indexed()),
                );
            }
        }

        for (name, raw) in &raw_properties {
            if properties.contains_key(name) {
                continue;
            }
            match self.compile_property(kind, name, raw) {
                Ok(prop) => {
                    properties.insert(name.clone(), prop);
                }
                Err(mut errs) => problems.append(&mut errs),
            }
        }

        check_virtual_params(&entity, &properties, &mut problems);

        if !problems.is_empty() {
            return Err(fail(problems));
        }

        let definition = SchemaDefinition {
            id: entity.clone(),
            kind,
            name: string_key(&entry.config, "name").unwrap_or_default(),
            collective_name: string_key(&entry.config, "collectiveName"),
            files: string_key(&entry.config, "files"),
            description: string_key(&entry.config, "description"),
            icon: string_key(&entry.config, "icon"),
            properties,
        };
        let validation = ValidationSchema::from_definition(&definition);

        debug!(
            "Compiled schema '{}' ({} properties, {} associations)",
            definition.id,
            definition.properties.len(),
            definition.associations().len()
        );

        Ok(CompiledSchema {
            definition,
            validation,
        })
    }

    /// Compiles every entry. Any failing entry fails the whole set, with all
    /// entry errors reported together.
    pub fn compile_all(
        &self,
        entries: &[RawSchemaEntry],
        version: u64,
    ) -> Result<CompiledSchemaSet, SchemaCompileErrors> {
        let mut definitions = Vec::with_capacity(entries.len());
        let mut validations = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for entry in entries {
            match self.compile(entry) {
                Ok(compiled) => {
                    if !seen.insert(compiled.definition.id.clone()) {
                        errors.push(SchemaCompileError::single(
                            compiled.definition.id.clone(),
                            entry.path.clone(),
                            "duplicate entity id",
                        ));
                        continue;
                    }
                    definitions.push(compiled.definition);
                    validations.push(compiled.validation);
                }
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            warn!("{} of {} schema(s) failed to compile", errors.len(), entries.len());
            return Err(SchemaCompileErrors(errors));
        }

        let fingerprint = SchemaHasher::fingerprint_all(entries.iter().map(|e| &e.config));
        info!(
            "Compiled {} schema(s), version {} fingerprint {}",
            definitions.len(),
            version,
            fingerprint
        );

        Ok(CompiledSchemaSet {
            definitions,
            validators: ValidatorRegistry::from_schemas(version, fingerprint, validations),
        })
    }

    fn compile_property(
        &self,
        kind: EntityKind,
        name: &str,
        raw: &JsonValue,
    ) -> Result<PropertyDefinition, Vec<String>> {
        let raw: RawProperty = serde_json::from_value(raw.clone())
            .map_err(|e| vec![format!("property '{}': {}", name, e)])?;
        let mut problems = Vec::new();

        let prop = match raw.property_type.as_str() {
            "string" | "integer" | "number" | "boolean" => {
                let scalar_type = ScalarType::parse(&raw.property_type).unwrap_or(ScalarType::String);
                if raw.enum_values.is_some() && scalar_type == ScalarType::Boolean {
                    problems.push(format!("property '{}': 'enum' is not allowed on booleans", name));
                }
                if raw.max_length.is_some() && scalar_type != ScalarType::String {
                    problems.push(format!("property '{}': 'maxLength' is only valid on strings", name));
                }
                PropertyDefinition::Scalar(ScalarProperty {
                    scalar_type,
                    enum_values: raw.enum_values.clone(),
                    index: raw.index,
                    max_length: raw.max_length,
                })
            }
            "object" | "array" => {
                let shape = if raw.property_type == "object" {
                    raw.properties.clone()
                } else {
                    raw.items.clone()
                };
                if shape.as_ref().is_some_and(contains_association) {
                    problems.push(format!("property '{}': associations may not be nested", name));
                }
                let structured = StructuredProperty { shape };
                if raw.property_type == "object" {
                    PropertyDefinition::Object(structured)
                } else {
                    PropertyDefinition::Array(structured)
                }
            }
            "association" => {
                if !kind.is_relational() {
                    problems.push(format!(
                        "property '{}': associations are only supported on collection schemas",
                        name
                    ));
                }
                match self.compile_association(name, &raw) {
                    Ok(assoc) => PropertyDefinition::Association(assoc),
                    Err(mut errs) => {
                        problems.append(&mut errs);
                        return Err(problems);
                    }
                }
            }
            "virtual" => {
                let Some(source) = raw.expression.as_deref() else {
                    problems.push(format!("property '{}': virtual requires an 'expression'", name));
                    return Err(problems);
                };
                match CompiledExpression::parse(source) {
                    Ok(expression) => {
                        for func in expression.unknown_functions() {
                            problems.push(format!(
                                "property '{}': function '{}' is not available",
                                name, func
                            ));
                        }
                        for var in expression.variables() {
                            if !raw.params.contains(&var) {
                                warn!(
                                    "Virtual field '{}' reads '{}' which is not a declared param; it will fail to evaluate",
                                    name, var
                                );
                            }
                        }
                        PropertyDefinition::Virtual(VirtualProperty {
                            expression,
                            params: raw.params.clone(),
                        })
                    }
                    Err(e) => {
                        problems.push(format!("property '{}': {}", name, e));
                        return Err(problems);
                    }
                }
            }
            other => {
                problems.push(format!("property '{}': unsupported type '{}'", name, other));
                return Err(problems);
            }
        };

        if raw.index && !matches!(prop, PropertyDefinition::Scalar(_)) {
            problems.push(format!(
                "property '{}': 'index' is only valid on scalar properties",
                name
            ));
        }

        if problems.is_empty() {
            Ok(prop)
        } else {
            Err(problems)
        }
    }

    fn compile_association(&self, name: &str, raw: &RawProperty) -> Result<AssociationProperty, Vec<String>> {
        let mut problems = Vec::new();

        let kind = match raw.relationship.as_deref() {
            Some(rel) => AssociationKind::parse(rel).or_else(|| {
                problems.push(format!("property '{}': unknown relationship '{}'", name, rel));
                None
            }),
            None => {
                problems.push(format!("property '{}': association requires a 'relationship'", name));
                None
            }
        };

        let target = raw.target.clone().filter(|t| !t.is_empty());
        if target.is_none() {
            problems.push(format!("property '{}': association requires a 'target'", name));
        }

        if let Some(kind) = kind {
            if kind == AssociationKind::BelongsToMany && raw.through.as_deref().map_or(true, str::is_empty) {
                problems.push(format!(
                    "property '{}': BelongsToMany requires a 'through' join entity",
                    name
                ));
            }
            if !kind.is_multi() && raw.max.is_some_and(|max| max > 1) {
                problems.push(format!(
                    "property '{}': {} holds a single target; 'max' cannot exceed 1",
                    name, kind
                ));
            }
        }

        if let (Some(min), Some(max)) = (raw.min, raw.max) {
            if min > max {
                problems.push(format!("property '{}': 'min' ({}) exceeds 'max' ({})", name, min, max));
            }
        }

        match (kind, target) {
            (Some(kind), Some(target)) if problems.is_empty() => Ok(AssociationProperty {
                kind,
                target,
                through: raw.through.clone(),
                min: raw.min,
                max: raw.max,
            }),
            _ => Err(problems),
        }
    }
}

/// Whether a nested object/array shape declares an association at any depth.
fn contains_association(shape: &JsonValue) -> bool {
    match shape {
        JsonValue::Object(map) => {
            if map.get("type").and_then(JsonValue::as_str) == Some("association") {
                return true;
            }
            map.values().any(contains_association)
        }
        JsonValue::Array(items) => items.iter().any(contains_association),
        _ => false,
    }
}

fn check_virtual_params(
    entity: &str,
    properties: &IndexMap<String, PropertyDefinition>,
    problems: &mut Vec<String>,
) {
    for (name, prop) in properties {
        let Some(virt) = prop.as_virtual() else {
            continue;
        };
        for param in &virt.params {
            match properties.get(param) {
                None => problems.push(format!(
                    "virtual '{}.{}': param '{}' is not a declared property",
                    entity, name, param
                )),
                Some(PropertyDefinition::Virtual(_)) => problems.push(format!(
                    "virtual '{}.{}': param '{}' is itself virtual",
                    entity, name, param
                )),
                Some(_) => {}
            }
        }
    }
}

fn string_key(config: &JsonValue, key: &str) -> Option<String> {
    config.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(config: JsonValue) -> RawSchemaEntry {
        RawSchemaEntry::from_path("schemas/test.json", config)
    }

    fn collection(id: &str, properties: JsonValue) -> RawSchemaEntry {
        entry(json!({
            "id": id,
            "type": "collection",
            "name": id,
            "collectiveName": format!("{}s", id),
            "files": format!("{}/*.yml", id),
            "properties": properties
        }))
    }

    fn problems(result: Result<CompiledSchema, SchemaCompileError>) -> Vec<String> {
        result.expect_err("compile should fail").problems
    }

    #[test]
    fn injects_reserved_properties_first() {
        let compiled = SchemaCompiler::new()
            .compile(&collection("task", json!({"title": {"type": "string"}})))
            .unwrap();
        let names: Vec<_> = compiled.definition.properties.keys().cloned().collect();
        assert_eq!(names, vec!["id", "shortId", "name", "title"]);
        assert_eq!(compiled.definition.indexed_columns(), vec!["id", "shortId", "name"]);
    }

    #[test]
    fn compiling_twice_is_deterministic() {
        let raw = collection(
            "task",
            json!({
                "title": {"type": "string", "maxLength": 80},
                "estimate": {"type": "integer", "index": true},
                "tags": {"type": "array", "items": {"type": "string"}}
            }),
        );
        let compiler = SchemaCompiler::new();
        assert_eq!(compiler.compile(&raw).unwrap(), compiler.compile(&raw).unwrap());
    }

    #[test]
    fn rejects_declared_reserved_names() {
        for reserved in RESERVED_PROPERTIES {
            let raw = collection("task", json!({ reserved: {"type": "string"} }));
            let errs = problems(SchemaCompiler::new().compile(&raw));
            assert_eq!(errs, vec![format!("property '{}' is reserved", reserved)]);
        }
    }

    #[test]
    fn rejects_marker_prefixed_ids_and_unknown_kinds() {
        let errs = problems(SchemaCompiler::new().compile(&collection("_hidden", json!({}))));
        assert!(errs[0].contains("reserved marker"));

        let errs = problems(SchemaCompiler::new().compile(&entry(json!({"id": "x", "type": "table"}))));
        assert_eq!(errs, vec!["unsupported entity type 'table'".to_string()]);
    }

    #[test]
    fn meta_errors_abort_before_properties() {
        let errs = problems(SchemaCompiler::new().compile(&entry(json!({
            "id": "task",
            "type": "collection",
            "properties": {"bad": {"type": "nonsense"}}
        }))));
        assert_eq!(
            errs,
            vec![
                "'name' is required".to_string(),
                "'collectiveName' is required".to_string(),
                "'files' is required".to_string()
            ]
        );
    }

    #[test]
    fn belongs_to_many_requires_through() {
        let raw = collection(
            "task",
            json!({"labels": {"type": "association", "relationship": "BelongsToMany", "target": "label"}}),
        );
        let errs = problems(SchemaCompiler::new().compile(&raw));
        assert_eq!(
            errs,
            vec!["property 'labels': BelongsToMany requires a 'through' join entity".to_string()]
        );
    }

    #[test]
    fn association_rules_are_checked_together() {
        let raw = collection(
            "task",
            json!({
                "owner": {"type": "association", "target": "user", "index": true},
                "parent": {"type": "association", "relationship": "BelongsTo", "target": "task", "max": 3},
                "blockers": {"type": "association", "relationship": "HasMany", "target": "task", "min": 4, "max": 2}
            }),
        );
        let errs = problems(SchemaCompiler::new().compile(&raw));
        assert_eq!(errs.len(), 3, "{:?}", errs);
        assert!(errs[0].contains("requires a 'relationship'"));
        assert!(errs[1].contains("cannot exceed 1"));
        assert!(errs[2].contains("exceeds 'max'"));
    }

    #[test]
    fn rejects_nested_associations_and_bad_indexes() {
        let raw = collection(
            "task",
            json!({
                "meta": {"type": "object", "properties": {
                    "inner": {"type": "array", "items": {"type": "association", "target": "user"}}
                }},
                "blob": {"type": "object", "index": true}
            }),
        );
        let errs = problems(SchemaCompiler::new().compile(&raw));
        assert_eq!(
            errs,
            vec![
                "property 'meta': associations may not be nested".to_string(),
                "property 'blob': 'index' is only valid on scalar properties".to_string()
            ]
        );
    }

    #[test]
    fn virtual_params_must_be_declared() {
        let raw = collection(
            "task",
            json!({
                "title": {"type": "string"},
                "label": {"type": "virtual", "expression": "upper(title)", "params": ["title", "missing"]}
            }),
        );
        let errs = problems(SchemaCompiler::new().compile(&raw));
        assert_eq!(
            errs,
            vec!["virtual 'task.label': param 'missing' is not a declared property".to_string()]
        );
    }

    #[test]
    fn virtual_syntax_errors_fail_compile() {
        let raw = collection(
            "task",
            json!({"label": {"type": "virtual", "expression": "1 +", "params": []}}),
        );
        let errs = problems(SchemaCompiler::new().compile(&raw));
        assert!(errs[0].starts_with("property 'label': parse error"));
    }

    #[test]
    fn singleton_gets_no_reserved_fields() {
        let compiled = SchemaCompiler::new()
            .compile(&entry(json!({
                "id": "settings",
                "type": "singleton",
                "name": "Settings",
                "properties": {"theme": {"type": "string", "enum": ["light", "dark"]}}
            })))
            .unwrap();
        assert_eq!(compiled.definition.kind, EntityKind::Singleton);
        assert_eq!(compiled.definition.properties.len(), 1);
        assert!(compiled.validation.required.is_empty());
    }

    #[test]
    fn compile_all_aggregates_every_failure() {
        let entries = vec![
            collection("ok", json!({})),
            collection("bad", json!({"id": {"type": "string"}})),
            collection("ok", json!({})),
            entry(json!({"id": "worse"})),
        ];
        let errs = SchemaCompiler::new().compile_all(&entries, 1).unwrap_err();
        let entities: Vec<_> = errs.0.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(entities, vec!["bad", "ok", "worse"]);
    }

    #[test]
    fn compile_all_builds_versioned_validators() {
        let entries = vec![collection("task", json!({})), collection("user", json!({}))];
        let set = SchemaCompiler::new().compile_all(&entries, 7).unwrap();
        assert_eq!(set.definitions.len(), 2);
        assert_eq!(set.validators.version(), 7);
        assert_eq!(set.validators.fingerprint().len(), 64);
        assert!(set.validators.get("user").is_some());
    }
}
