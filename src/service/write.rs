use super::{blocking, model_for, DataService};
use crate::error::{ModelError, ModelResult, ValidationFailure};
use crate::query::QuerySpec;
use crate::registry::{Accessor, AccessorEntry, Model, ModelSet};
use crate::schema::AssociationKind;
use crate::storage::Row;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One document a bulk load could not persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLoadFailure {
    pub index: usize,
    pub id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<BulkLoadFailure>,
}

impl BulkLoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Association value as accepted by accessors.
enum Targets {
    One(Option<String>),
    Many(Vec<String>),
}

fn parse_targets(entry: &AccessorEntry, value: &JsonValue) -> ModelResult<Targets> {
    let invalid = |expected: &str| {
        ModelError::InvalidData(format!(
            "'{}.{}' expects {}",
            entry.descriptor.source, entry.descriptor.property, expected
        ))
    };
    match (&entry.accessor, value) {
        (Accessor::Single(_), JsonValue::Null) => Ok(Targets::One(None)),
        (Accessor::Single(_), JsonValue::String(id)) => Ok(Targets::One(Some(id.clone()))),
        (Accessor::Single(_), _) => Err(invalid("an id or null")),
        (Accessor::Multi(_), JsonValue::Null) => Ok(Targets::Many(Vec::new())),
        (Accessor::Multi(_), JsonValue::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| invalid("an array of ids")))
            .collect::<ModelResult<Vec<_>>>()
            .map(Targets::Many),
        (Accessor::Multi(_), _) => Err(invalid("an array of ids or null")),
    }
}

fn apply_targets(entry: &AccessorEntry, instance_id: &str, targets: &Targets) -> ModelResult<()> {
    match (&entry.accessor, targets) {
        (Accessor::Single(single), Targets::One(target)) => single.set(instance_id, target.as_deref()),
        (Accessor::Multi(multi), Targets::Many(ids)) => multi.set(instance_id, ids),
        _ => Err(ModelError::InvalidData(format!(
            "target shape does not match '{}.{}'",
            entry.descriptor.source, entry.descriptor.property
        ))),
    }
}

/// Current membership of an association, in the shape `apply_targets` takes.
fn membership(entry: &AccessorEntry, instance_id: &str) -> ModelResult<Targets> {
    let id_of = |row: &Row| row.get("id").and_then(JsonValue::as_str).map(str::to_string);
    match &entry.accessor {
        Accessor::Single(single) => Ok(Targets::One(single.get(instance_id)?.as_ref().and_then(id_of))),
        Accessor::Multi(multi) => Ok(Targets::Many(
            multi
                .get(instance_id, &QuerySpec::unbounded())?
                .iter()
                .filter_map(id_of)
                .collect(),
        )),
    }
}

/// Fills `shortId` and `name` from the id when they are absent.
fn apply_defaults(document: &mut Row, id: &str) {
    let missing = |doc: &Row, key: &str| doc.get(key).map_or(true, JsonValue::is_null);
    if missing(document, "shortId") {
        document.insert("shortId".into(), JsonValue::String(id.chars().take(8).collect()));
    }
    if missing(document, "name") {
        document.insert("name".into(), JsonValue::String(id.to_string()));
    }
}

/// The stored row: table columns only, leaving association columns as they
/// were until the association phase sets them.
fn stored_row(model: &Model, existing: Option<&Row>, document: &Row) -> Row {
    let mut row = existing.cloned().unwrap_or_default();
    for (key, value) in document {
        if model.table.has_column(key) && !model.definition.is_association(key) {
            row.insert(key.clone(), value.clone());
        }
    }
    row
}

impl DataService {
    /// Creates or updates one instance.
    ///
    /// The row is written first; association properties present in `content`
    /// are then set concurrently. If any of them fails, the associations and
    /// then the row are restored to their previous state (a new row is
    /// removed) and the error is returned.
    pub async fn upsert_instance(&self, entity: &str, content: JsonValue) -> ModelResult<Row> {
        let set = self.handle.current();
        let model = model_for(&set, entity)?;
        let validator = set
            .validator(entity)
            .ok_or_else(|| ModelError::NotFound(format!("validator for '{}'", entity)))?;

        let JsonValue::Object(content) = content else {
            return Err(ModelError::InvalidData(format!("'{}' instance must be an object", entity)));
        };
        for (key, value) in &content {
            if let Some(column) = model.virtual_column(key) {
                column.set(value)?;
            }
        }
        let Some(id) = content.get("id").and_then(JsonValue::as_str).map(str::to_string) else {
            return Err(ValidationFailure {
                entity: entity.to_string(),
                errors: vec!["missing required property 'id'".to_string()],
            }
            .into());
        };

        let backend = set.backend().clone();
        let existing = {
            let (backend, model, id) = (backend.clone(), model.clone(), id.clone());
            blocking("read", move || Ok(backend.get_row(&model.table, &id)?)).await?
        };

        let mut document = existing.clone().unwrap_or_default();
        document.extend(content.clone());
        apply_defaults(&mut document, &id);
        validator.validate(&JsonValue::Object(document.clone()))?;

        let row = stored_row(&model, existing.as_ref(), &document);
        {
            let (backend, model, id, row) = (backend.clone(), model.clone(), id.clone(), row.clone());
            blocking("write", move || Ok(backend.put_row(&model.table, &id, &row)?)).await?;
        }
        debug!("Wrote '{}' row '{}'", entity, id);

        if let Err(err) = self.set_associations(&set, entity, &id, &content).await {
            warn!("Association write for '{}' '{}' failed, rolling back: {}", entity, id, err);
            let (model, id) = (model.clone(), id.clone());
            let restored = blocking("rollback", move || {
                match existing {
                    Some(previous) => backend.put_row(&model.table, &id, &previous)?,
                    None => {
                        backend.delete_row(&model.table, &id)?;
                    }
                }
                Ok(())
            })
            .await;
            if let Err(rollback) = restored {
                warn!("Rollback of '{}' failed: {}", entity, rollback);
            }
            return Err(err);
        }

        let (backend, id_for_read) = (set.backend().clone(), id.clone());
        let stored = blocking("read", move || {
            let mut row = backend
                .get_row(&model.table, &id_for_read)?
                .ok_or_else(|| ModelError::NotFound(format!("{} '{}'", model.entity(), id_for_read)))?;
            model.project(&mut row)?;
            Ok(row)
        })
        .await?;
        info!("Upserted '{}' instance '{}'", entity, id);
        Ok(stored)
    }

    /// Sets every association property present in `content`, concurrently.
    ///
    /// Every write is awaited. If any failed, each touched association is
    /// set back to the membership it had before and the first error is
    /// returned.
    async fn set_associations(&self, set: &Arc<ModelSet>, entity: &str, id: &str, content: &Row) -> ModelResult<()> {
        let mut planned = Vec::new();
        for entry in set.accessors(entity) {
            let Some(value) = content.get(&entry.descriptor.property) else {
                continue;
            };
            planned.push((entry.clone(), parse_targets(entry, value)?));
        }
        if planned.is_empty() {
            return Ok(());
        }

        let previous = {
            let entries: Vec<AccessorEntry> = planned.iter().map(|(entry, _)| entry.clone()).collect();
            let id = id.to_string();
            blocking("snapshot", move || {
                entries
                    .into_iter()
                    .map(|entry| -> ModelResult<(AccessorEntry, Targets)> {
                        let targets = membership(&entry, &id)?;
                        Ok((entry, targets))
                    })
                    .collect::<ModelResult<Vec<_>>>()
            })
            .await?
        };

        let writes = planned.into_iter().map(|(entry, targets)| {
            let id = id.to_string();
            blocking("associate", move || apply_targets(&entry, &id, &targets))
        });
        let Some(err) = join_all(writes).await.into_iter().find_map(Result::err) else {
            return Ok(());
        };

        let (instance, label) = (id.to_string(), format!("{} '{}'", entity, id));
        let restored = blocking("restore", move || {
            let mut first = None;
            for (entry, targets) in &previous {
                if let Err(e) = apply_targets(entry, &instance, targets) {
                    warn!("Could not restore '{}': {}", entry.descriptor.property, e);
                    first.get_or_insert(e);
                }
            }
            first.map_or(Ok(()), Err)
        })
        .await;
        if let Err(restore) = restored {
            warn!("Associations of {} were only partly restored: {}", label, restore);
        }
        Err(err)
    }

    /// Sets one association of an existing instance. `targets` is an id or
    /// null for single-valued relations, an array of ids for multi-valued.
    pub async fn set_association(
        &self,
        entity: &str,
        instance_id: &str,
        property: &str,
        targets: JsonValue,
    ) -> ModelResult<()> {
        let set = self.handle.current();
        let model = model_for(&set, entity)?;
        let entry = set.resolve_accessor(entity, property)?.clone();
        let targets = parse_targets(&entry, &targets)?;
        let (backend, id) = (set.backend().clone(), instance_id.to_string());
        blocking("associate", move || {
            if backend.get_row(&model.table, &id)?.is_none() {
                return Err(ModelError::NotFound(format!("{} '{}'", model.entity(), id)));
            }
            apply_targets(&entry, &id, &targets)
        })
        .await
    }

    /// Deletes an instance after detaching it from every relation it owns.
    /// Returns whether the instance existed.
    pub async fn remove_instance(&self, entity: &str, instance_id: &str) -> ModelResult<bool> {
        let set = self.handle.current();
        let model = model_for(&set, entity)?;
        let entries: Vec<AccessorEntry> = set.accessors(entity).cloned().collect();
        let (backend, id) = (set.backend().clone(), instance_id.to_string());
        let removed = blocking("remove", move || {
            if backend.get_row(&model.table, &id)?.is_none() {
                return Ok(false);
            }
            for entry in &entries {
                match &entry.accessor {
                    Accessor::Multi(multi) => multi.set(&id, &[])?,
                    // A BelongsTo key lives on the row being deleted.
                    Accessor::Single(_) if entry.descriptor.kind == AssociationKind::BelongsTo => {}
                    Accessor::Single(single) => single.set(&id, None)?,
                }
            }
            Ok(backend.delete_row(&model.table, &id)?)
        })
        .await?;
        if removed {
            info!("Removed '{}' instance '{}'", entity, instance_id);
        }
        Ok(removed)
    }

    /// Upserts every document independently. A failing document is recorded
    /// and does not stop the others.
    pub async fn bulk_load(&self, entity: &str, documents: Vec<JsonValue>) -> BulkLoadReport {
        let total = documents.len();
        let results = join_all(documents.into_iter().map(|doc| {
            let id = doc.get("id").and_then(JsonValue::as_str).map(str::to_string);
            async move { (id, self.upsert_instance(entity, doc).await) }
        }))
        .await;

        let mut report = BulkLoadReport::default();
        for (index, (id, result)) in results.into_iter().enumerate() {
            match result {
                Ok(row) => report
                    .loaded
                    .push(row.get("id").and_then(JsonValue::as_str).unwrap_or_default().to_string()),
                Err(err) => {
                    warn!("Bulk load of '{}' document {} failed: {}", entity, index, err);
                    report.failed.push(BulkLoadFailure {
                        index,
                        id,
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            "Bulk loaded {}/{} '{}' document(s)",
            report.loaded.len(),
            total,
            entity
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_id() {
        let mut doc = Row::new();
        apply_defaults(&mut doc, "a1b2c3d4e5f6");
        assert_eq!(doc["shortId"], JsonValue::from("a1b2c3d4"));
        assert_eq!(doc["name"], JsonValue::from("a1b2c3d4e5f6"));

        let mut named = Row::new();
        named.insert("name".into(), JsonValue::from("Kept"));
        apply_defaults(&mut named, "x");
        assert_eq!(named["name"], JsonValue::from("Kept"));
        assert_eq!(named["shortId"], JsonValue::from("x"));
    }
}
