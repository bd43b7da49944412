//! Embedding related instances into loaded rows.

use crate::error::ModelResult;
use crate::query::QuerySpec;
use crate::registry::{Accessor, ModelSet};
use crate::storage::Row;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Loads one instance of an entity by id.
pub type DocumentQuery = Arc<dyn Fn(&str) -> ModelResult<Option<Row>> + Send + Sync>;

/// Related value of one relation: an object (or null) for single-valued
/// relations, an array for multi-valued ones.
pub(crate) fn related_value(set: &ModelSet, entity: &str, alias: &str, instance_id: &str) -> ModelResult<JsonValue> {
    let entry = set.resolve_accessor(entity, alias)?;
    let value = match &entry.accessor {
        Accessor::Single(single) => single.get(instance_id)?.map_or(JsonValue::Null, JsonValue::Object),
        Accessor::Multi(multi) => JsonValue::Array(
            multi
                .get(instance_id, &QuerySpec::unbounded())?
                .into_iter()
                .map(JsonValue::Object)
                .collect(),
        ),
    };
    Ok(value)
}

/// Replaces each `aliases` key of every row with the related instance(s).
pub(crate) fn embed(set: &ModelSet, entity: &str, rows: &mut [Row], aliases: &[String]) -> ModelResult<()> {
    if aliases.is_empty() {
        return Ok(());
    }
    for row in rows.iter_mut() {
        let Some(id) = row.get("id").and_then(JsonValue::as_str).map(str::to_string) else {
            continue;
        };
        for alias in aliases {
            let value = related_value(set, entity, alias, &id)?;
            row.insert(alias.clone(), value);
        }
    }
    Ok(())
}

/// Wraps `base` so every loaded instance of `entity` carries the relations
/// its virtual fields reference. The include list is taken from `set` once,
/// when the wrapper is built.
pub fn with_virtual_includes(set: Arc<ModelSet>, entity: &str, base: DocumentQuery) -> DocumentQuery {
    let entity = entity.to_string();
    let aliases: Vec<String> = set
        .virtual_includes(&entity)
        .iter()
        .map(|include| include.relation_alias.clone())
        .collect();
    Arc::new(move |id: &str| {
        let Some(row) = base(id)? else {
            return Ok(None);
        };
        let mut rows = [row];
        embed(&set, &entity, &mut rows, &aliases)?;
        let [row] = rows;
        Ok(Some(row))
    })
}
