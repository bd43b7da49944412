//! Binds association accessors to a storage layout.

use super::accessor::{AccessorParts, CountFn, HasFn, MultiGetFn, MultiMutateFn, SingleGetFn, SingleSetFn};
use super::model::Model;
use crate::error::{ModelError, ModelResult};
use crate::query::{self, Predicate, QuerySpec};
use crate::schema::{AssociationDescriptor, AssociationKind};
use crate::storage::{fold, values_match, Collation, LinkEnd, LinkSpec, Row, StorageBackend};
use log::debug;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;

/// Where the rows of one association are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationStorage {
    /// Foreign key column on the source row (`BelongsTo`)
    SourceColumn(String),
    /// Foreign key column on each target row (`HasOne`, `HasMany`)
    TargetColumn(String),
    /// Link table (`BelongsToMany`)
    Link(LinkSpec),
}

/// Everything an adapter needs to wire one association.
#[derive(Clone)]
pub struct RelationWiring {
    pub descriptor: AssociationDescriptor,
    pub source: Arc<Model>,
    pub target: Arc<Model>,
    pub storage: RelationStorage,
    pub backend: Arc<dyn StorageBackend>,
}

/// Produces accessor operations for an association. Missing operations make
/// registration fail.
pub trait RelationAdapter: Send + Sync {
    fn wire(&self, wiring: &RelationWiring) -> AccessorParts;
}

/// Adapter over any [`StorageBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreRelationAdapter;

impl RelationAdapter for StoreRelationAdapter {
    fn wire(&self, wiring: &RelationWiring) -> AccessorParts {
        match (&wiring.storage, wiring.descriptor.kind) {
            (RelationStorage::SourceColumn(column), AssociationKind::BelongsTo) => {
                source_key_parts(Arc::new(SourceKey {
                    backend: wiring.backend.clone(),
                    source: wiring.source.clone(),
                    target: wiring.target.clone(),
                    column: column.clone(),
                }))
            }
            (RelationStorage::TargetColumn(column), AssociationKind::HasOne | AssociationKind::HasMany) => {
                target_key_parts(
                    Arc::new(TargetKey {
                        backend: wiring.backend.clone(),
                        target: wiring.target.clone(),
                        column: column.clone(),
                    }),
                    wiring.descriptor.kind,
                )
            }
            (RelationStorage::Link(link), AssociationKind::BelongsToMany) => link_parts(Arc::new(LinkKey {
                backend: wiring.backend.clone(),
                source: wiring.source.clone(),
                target: wiring.target.clone(),
                link: link.clone(),
            })),
            _ => AccessorParts::default(),
        }
    }
}

fn not_found(model: &Model, id: &str) -> ModelError {
    ModelError::NotFound(format!("{} '{}'", model.entity(), id))
}

fn fetch(backend: &dyn StorageBackend, model: &Model, id: &str) -> ModelResult<Option<Row>> {
    match backend.get_row(&model.table, id)? {
        Some(mut row) => {
            model.project(&mut row)?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

fn folded_set(ids: &[String]) -> HashSet<String> {
    ids.iter().map(|id| fold(id)).collect()
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(JsonValue::as_str)
}

fn count_rows(rows: Vec<Row>, predicate: Option<&Predicate>) -> usize {
    match predicate {
        Some(predicate) => rows.iter().filter(|row| predicate.matches(row)).count(),
        None => rows.len(),
    }
}

struct SourceKey {
    backend: Arc<dyn StorageBackend>,
    source: Arc<Model>,
    target: Arc<Model>,
    column: String,
}

impl SourceKey {
    fn get(&self, instance_id: &str) -> ModelResult<Option<Row>> {
        let Some(row) = self.backend.get_row(&self.source.table, instance_id)? else {
            return Ok(None);
        };
        match row.get(&self.column).and_then(JsonValue::as_str) {
            Some(target_id) => fetch(self.backend.as_ref(), &self.target, target_id),
            None => Ok(None),
        }
    }

    fn set(&self, instance_id: &str, target_id: Option<&str>) -> ModelResult<()> {
        let value = target_id.map_or(JsonValue::Null, |id| JsonValue::String(id.to_string()));
        if self.backend.set_column(&self.source.table, instance_id, &self.column, value)? {
            Ok(())
        } else {
            Err(not_found(&self.source, instance_id))
        }
    }
}

fn source_key_parts(key: Arc<SourceKey>) -> AccessorParts {
    let getter = key.clone();
    let get: SingleGetFn = Arc::new(move |id: &str| getter.get(id));
    let set: SingleSetFn = Arc::new(move |id: &str, target: Option<&str>| key.set(id, target));
    AccessorParts {
        get_one: Some(get),
        set_one: Some(set),
        ..Default::default()
    }
}

struct TargetKey {
    backend: Arc<dyn StorageBackend>,
    target: Arc<Model>,
    column: String,
}

impl TargetKey {
    fn members(&self, instance_id: &str) -> ModelResult<Vec<Row>> {
        let owner = JsonValue::String(instance_id.to_string());
        Ok(self.backend.rows_where(&self.target.table, &self.column, &owner)?)
    }

    fn points_at(&self, row: &Row, instance_id: &str) -> bool {
        let owner = JsonValue::String(instance_id.to_string());
        row.get(&self.column)
            .is_some_and(|stored| values_match(Collation::CaseInsensitive, stored, &owner))
    }

    /// Targets without a row yet get the key deferred until they are
    /// written.
    fn attach(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        let table = &self.target.table;
        for target_id in targets {
            let owner = JsonValue::String(instance_id.to_string());
            if self.backend.set_column(table, target_id, &self.column, owner.clone())? {
                continue;
            }
            debug!(
                "Deferring {} '{}' -> '{}' until the row exists",
                self.target.entity(),
                target_id,
                instance_id
            );
            self.backend.defer_column(table, target_id, &self.column, owner.clone())?;
            // The row may have been written between the two calls.
            if self.backend.get_row(table, target_id)?.is_some()
                && self.backend.discard_deferred(table, target_id, &self.column, &owner)?
            {
                self.backend.set_column(table, target_id, &self.column, owner)?;
            }
        }
        Ok(())
    }

    fn detach(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        let owner = JsonValue::String(instance_id.to_string());
        for target_id in targets {
            self.backend
                .discard_deferred(&self.target.table, target_id, &self.column, &owner)?;
            if let Some(row) = self.backend.get_row(&self.target.table, target_id)? {
                if self.points_at(&row, instance_id) {
                    self.backend
                        .set_column(&self.target.table, target_id, &self.column, JsonValue::Null)?;
                }
            }
        }
        Ok(())
    }

    fn replace(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        let keep = folded_set(targets);
        let owner = JsonValue::String(instance_id.to_string());
        for id in self.backend.deferred_ids(&self.target.table, &self.column, &owner)? {
            if !keep.contains(&id) {
                self.backend
                    .discard_deferred(&self.target.table, &id, &self.column, &owner)?;
            }
        }
        for row in self.members(instance_id)? {
            if let Some(id) = row_id(&row) {
                if !keep.contains(&fold(id)) {
                    self.backend
                        .set_column(&self.target.table, id, &self.column, JsonValue::Null)?;
                }
            }
        }
        self.attach(instance_id, targets)
    }

    fn get_many(&self, instance_id: &str, spec: &QuerySpec) -> ModelResult<Vec<Row>> {
        let outcome = query::execute(self.members(instance_id)?, spec, &self.target.virtuals)?;
        Ok(outcome.rows)
    }

    fn get_one(&self, instance_id: &str) -> ModelResult<Option<Row>> {
        match self.members(instance_id)?.into_iter().next() {
            Some(mut row) => {
                self.target.project(&mut row)?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Deferred keys count: the membership is recorded even before the
    /// target row exists.
    fn has(&self, instance_id: &str, target_id: &str) -> ModelResult<bool> {
        if self
            .backend
            .get_row(&self.target.table, target_id)?
            .is_some_and(|row| self.points_at(&row, instance_id))
        {
            return Ok(true);
        }
        let owner = JsonValue::String(instance_id.to_string());
        Ok(self
            .backend
            .deferred_ids(&self.target.table, &self.column, &owner)?
            .contains(&fold(target_id)))
    }
}

fn target_key_parts(key: Arc<TargetKey>, kind: AssociationKind) -> AccessorParts {
    if kind == AssociationKind::HasOne {
        let getter = key.clone();
        let get: SingleGetFn = Arc::new(move |id: &str| getter.get_one(id));
        let set: SingleSetFn = Arc::new(move |id: &str, target: Option<&str>| {
            let targets: Vec<String> = target.map(str::to_string).into_iter().collect();
            key.replace(id, &targets)
        });
        return AccessorParts {
            get_one: Some(get),
            set_one: Some(set),
            ..Default::default()
        };
    }

    let (getter, setter, adder, remover, counter) = (key.clone(), key.clone(), key.clone(), key.clone(), key.clone());
    let get: MultiGetFn = Arc::new(move |id: &str, spec: &QuerySpec| getter.get_many(id, spec));
    let set: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| setter.replace(id, targets));
    let add: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| adder.attach(id, targets));
    let remove: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| remover.detach(id, targets));
    let count: CountFn = Arc::new(move |id: &str, predicate: Option<&Predicate>| {
        Ok(count_rows(counter.members(id)?, predicate))
    });
    let has: HasFn = Arc::new(move |id: &str, target: &str| key.has(id, target));
    AccessorParts {
        get_many: Some(get),
        set_many: Some(set),
        add: Some(add),
        remove: Some(remove),
        count: Some(count),
        has: Some(has),
        ..Default::default()
    }
}

struct LinkKey {
    backend: Arc<dyn StorageBackend>,
    source: Arc<Model>,
    target: Arc<Model>,
    link: LinkSpec,
}

impl LinkKey {
    fn from<'a>(&'a self, instance_id: &'a str) -> LinkEnd<'a> {
        LinkEnd::new(self.source.entity(), instance_id)
    }

    fn to<'a>(&'a self, target_id: &'a str) -> LinkEnd<'a> {
        LinkEnd::new(self.target.entity(), target_id)
    }

    fn linked(&self, instance_id: &str) -> ModelResult<Vec<String>> {
        Ok(self
            .backend
            .linked_ids(&self.link, self.from(instance_id), self.target.entity())?)
    }

    /// Linked rows that exist. Links may point at rows not written yet.
    fn members(&self, instance_id: &str) -> ModelResult<Vec<Row>> {
        let mut rows = Vec::new();
        for id in self.linked(instance_id)? {
            if let Some(row) = self.backend.get_row(&self.target.table, &id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn add(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        for target_id in targets {
            self.backend
                .link(&self.link, self.from(instance_id), self.to(target_id))?;
        }
        Ok(())
    }

    fn remove(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        for target_id in targets {
            self.backend
                .unlink(&self.link, self.from(instance_id), self.to(target_id))?;
        }
        Ok(())
    }

    fn replace(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        let keep = folded_set(targets);
        let stale: Vec<String> = self
            .linked(instance_id)?
            .into_iter()
            .filter(|id| !keep.contains(&fold(id)))
            .collect();
        self.remove(instance_id, &stale)?;
        self.add(instance_id, targets)
    }

    fn get_many(&self, instance_id: &str, spec: &QuerySpec) -> ModelResult<Vec<Row>> {
        let outcome = query::execute(self.members(instance_id)?, spec, &self.target.virtuals)?;
        Ok(outcome.rows)
    }

    fn has(&self, instance_id: &str, target_id: &str) -> ModelResult<bool> {
        Ok(self
            .backend
            .is_linked(&self.link, self.from(instance_id), self.to(target_id))?)
    }
}

fn link_parts(key: Arc<LinkKey>) -> AccessorParts {
    let (getter, setter, adder, remover, counter) = (key.clone(), key.clone(), key.clone(), key.clone(), key.clone());
    let get: MultiGetFn = Arc::new(move |id: &str, spec: &QuerySpec| getter.get_many(id, spec));
    let set: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| setter.replace(id, targets));
    let add: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| adder.add(id, targets));
    let remove: MultiMutateFn = Arc::new(move |id: &str, targets: &[String]| remover.remove(id, targets));
    let count: CountFn = Arc::new(move |id: &str, predicate: Option<&Predicate>| {
        Ok(count_rows(counter.members(id)?, predicate))
    });
    let has: HasFn = Arc::new(move |id: &str, target: &str| key.has(id, target));
    AccessorParts {
        get_many: Some(get),
        set_many: Some(set),
        add: Some(add),
        remove: Some(remove),
        count: Some(count),
        has: Some(has),
        ..Default::default()
    }
}
