//! Virtual Field Evaluator.
//!
//! A virtual field is computed from the declared params of its own row. Only
//! those params are read from the row. Association params are bound to null
//! because their values are not loaded with the row. Anything else the
//! expression reads is unbound and fails evaluation.

use crate::error::VirtualFieldError;
use crate::expression::{CompiledExpression, ExpressionError, Value};
use crate::schema::SchemaDefinition;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Evaluates `expression` with only `params` bound from `instance`.
///
/// Params missing from the instance are bound to null.
pub fn evaluate(
    expression: &CompiledExpression,
    params: &[String],
    instance: &Map<String, JsonValue>,
) -> Result<JsonValue, ExpressionError> {
    expression.evaluate(context(params, &[], instance)).map(JsonValue::from)
}

fn context(params: &[String], masked: &[String], instance: &Map<String, JsonValue>) -> HashMap<String, Value> {
    let mut context: HashMap<String, Value> = params
        .iter()
        .map(|param| {
            let value = instance.get(param).cloned().map(Value::from).unwrap_or(Value::Null);
            (param.clone(), value)
        })
        .collect();
    for param in masked {
        context.insert(param.clone(), Value::Null);
    }
    context
}

/// A virtual property bound to the entity that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualColumn {
    pub entity: String,
    pub name: String,
    pub expression: CompiledExpression,
    /// Declared params read from the row
    pub bindings: Vec<String>,
    /// Declared association params, always bound to null
    pub masked: Vec<String>,
}

impl VirtualColumn {
    /// Every virtual column of a definition, in declaration order.
    pub fn from_definition(definition: &SchemaDefinition) -> Vec<VirtualColumn> {
        definition
            .virtuals()
            .map(|(name, virt)| VirtualColumn {
                entity: definition.id.clone(),
                name: name.clone(),
                expression: virt.expression.clone(),
                bindings: virt
                    .params
                    .iter()
                    .filter(|param| !definition.is_association(param))
                    .cloned()
                    .collect(),
                masked: virt
                    .params
                    .iter()
                    .filter(|param| definition.is_association(param))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    /// Computes the column for one row.
    pub fn get(&self, instance: &Map<String, JsonValue>) -> Result<JsonValue, VirtualFieldError> {
        self.expression
            .evaluate(context(&self.bindings, &self.masked, instance))
            .map(JsonValue::from)
            .map_err(|e| VirtualFieldError::Evaluation {
                entity: self.entity.clone(),
                field: self.name.clone(),
                message: e.to_string(),
            })
    }

    /// Virtual fields are derived; writing one always fails.
    pub fn set(&self, _value: &JsonValue) -> Result<(), VirtualFieldError> {
        Err(VirtualFieldError::Immutable {
            entity: self.entity.clone(),
            field: self.name.clone(),
        })
    }
}

/// Writes every virtual column into `row`. The first failing column fails the
/// whole projection.
pub fn project(columns: &[VirtualColumn], row: &mut Map<String, JsonValue>) -> Result<(), VirtualFieldError> {
    for column in columns {
        let value = column.get(row)?;
        row.insert(column.name.clone(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawSchemaEntry, SchemaCompiler};
    use serde_json::json;

    fn person_schema() -> SchemaDefinition {
        SchemaCompiler::new()
            .compile(&RawSchemaEntry::new(json!({
                "id": "person",
                "type": "collection",
                "name": "Person",
                "collectiveName": "People",
                "files": "people/*.yml",
                "properties": {
                    "first": {"type": "string"},
                    "last": {"type": "string"},
                    "team": {"type": "association", "relationship": "BelongsTo", "target": "team"},
                    "full": {"type": "virtual", "expression": "first + \" \" + last", "params": ["first", "last"]},
                    "sneaky": {"type": "virtual", "expression": "first + secret", "params": ["first"]},
                    "teamLabel": {"type": "virtual", "expression": "coalesce(team, \"none\")", "params": ["team"]}
                }
            })))
            .unwrap()
            .definition
    }

    fn column(name: &str) -> VirtualColumn {
        VirtualColumn::from_definition(&person_schema())
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    fn row(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn recomputes_when_params_change() {
        let full = column("full");
        let mut instance = row(json!({"first": "Ada", "last": "Lovelace"}));
        assert_eq!(full.get(&instance).unwrap(), json!("Ada Lovelace"));

        instance.insert("first".into(), json!("Augusta"));
        assert_eq!(full.get(&instance).unwrap(), json!("Augusta Lovelace"));

        instance.insert("last".into(), json!("King"));
        assert_eq!(full.get(&instance).unwrap(), json!("Augusta King"));
    }

    #[test]
    fn undeclared_param_is_an_evaluation_error() {
        let sneaky = column("sneaky");
        let instance = row(json!({"first": "Ada", "secret": "x"}));
        match sneaky.get(&instance) {
            Err(VirtualFieldError::Evaluation { entity, field, message }) => {
                assert_eq!(entity, "person");
                assert_eq!(field, "sneaky");
                assert!(message.contains("secret"));
            }
            other => panic!("expected evaluation error, got {:?}", other),
        }
    }

    #[test]
    fn association_params_read_as_null() {
        let label = column("teamLabel");
        assert!(label.bindings.is_empty());
        assert_eq!(label.masked, vec!["team".to_string()]);
        let instance = row(json!({"team": "t1"}));
        assert_eq!(label.get(&instance).unwrap(), json!("none"));
    }

    #[test]
    fn free_function_binds_only_given_params() {
        let full = column("full");
        let instance = row(json!({"first": "Ada", "last": "L"}));
        let value = evaluate(&full.expression, &["first".to_string(), "last".to_string()], &instance);
        assert_eq!(value.unwrap(), json!("Ada L"));
        // `last` is not passed, so it is unbound rather than null.
        assert!(evaluate(&full.expression, &["first".to_string()], &instance).is_err());
    }

    #[test]
    fn writes_are_rejected() {
        assert_eq!(
            column("full").set(&json!("x")),
            Err(VirtualFieldError::Immutable {
                entity: "person".into(),
                field: "full".into()
            })
        );
    }

    #[test]
    fn project_fills_columns_or_fails() {
        let columns = vec![column("full")];
        let mut instance = row(json!({"first": "Ada"}));
        project(&columns, &mut instance).unwrap();
        assert_eq!(instance["full"], json!("Ada "));

        let failing = vec![column("sneaky")];
        assert!(project(&failing, &mut row(json!({}))).is_err());
    }
}
