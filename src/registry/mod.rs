//! Model Registry and Association Manager.
//!
//! Registration runs in two passes over compiled definitions. The first
//! builds a relational model for every collection. The second resolves each
//! association against those models, places foreign keys and link tables,
//! and asks a [`RelationAdapter`] for the accessor operations. Any failure
//! rejects the whole set; no partial registry is ever produced.

pub mod accessor;
pub mod adapter;
pub mod handle;
pub mod model;

pub use accessor::{Accessor, AccessorEntry, AccessorParts, MultiAccessor, SingleAccessor};
pub use adapter::{RelationAdapter, RelationStorage, RelationWiring, StoreRelationAdapter};
pub use handle::RegistryHandle;
pub use model::{Model, VirtualInclude};

use crate::error::{AccessorNotFound, RegistrationError};
use crate::schema::{AssociationDescriptor, AssociationKind, SchemaDefinition, ValidationSchema, ValidatorRegistry};
use crate::storage::{ColumnSpec, LinkSpec, StorageBackend, SyncPlan};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One immutable registry generation.
pub struct ModelSet {
    generation: u64,
    models: HashMap<String, Arc<Model>>,
    accessors: HashMap<String, HashMap<String, AccessorEntry>>,
    definitions: HashMap<String, Arc<SchemaDefinition>>,
    validators: ValidatorRegistry,
    links: Vec<LinkSpec>,
    backend: Arc<dyn StorageBackend>,
    retired: AtomicBool,
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("generation", &self.generation)
            .field("models", &self.models)
            .field("definitions", &self.definitions)
            .field("links", &self.links)
            .field("retired", &self.retired)
            .finish_non_exhaustive()
    }
}

impl ModelSet {
    /// A generation with no entities.
    pub fn empty(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            generation: 0,
            models: HashMap::new(),
            accessors: HashMap::new(),
            definitions: HashMap::new(),
            validators: ValidatorRegistry::new(0, String::new()),
            links: Vec::new(),
            backend,
            retired: AtomicBool::new(false),
        }
    }

    /// Marks the generation as replaced. Its tables are dropped with the
    /// last reference; a generation never retired keeps them on drop.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn model(&self, entity: &str) -> Option<&Arc<Model>> {
        self.models.get(entity)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Definitions of every entity, relational or not.
    pub fn definition(&self, entity: &str) -> Option<&Arc<SchemaDefinition>> {
        self.definitions.get(entity)
    }

    pub fn validator(&self, entity: &str) -> Option<Arc<ValidationSchema>> {
        self.validators.get(entity)
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    pub fn accessors(&self, entity: &str) -> impl Iterator<Item = &AccessorEntry> {
        self.accessors.get(entity).into_iter().flat_map(|by_name| by_name.values())
    }

    pub fn resolve_accessor(&self, entity: &str, property: &str) -> Result<&AccessorEntry, AccessorNotFound> {
        self.accessors
            .get(entity)
            .and_then(|by_name| by_name.get(property))
            .ok_or_else(|| AccessorNotFound {
                entity: entity.to_string(),
                property: property.to_string(),
            })
    }

    pub fn virtual_includes(&self, entity: &str) -> &[VirtualInclude] {
        self.models
            .get(entity)
            .map(|model| model.virtual_includes.as_slice())
            .unwrap_or(&[])
    }

    /// Tables and link tables this generation needs, carrying rows over from
    /// `previous`.
    pub fn sync_plan(&self, previous: Option<u64>) -> SyncPlan {
        let mut tables: Vec<_> = self.models.values().map(|m| m.table.clone()).collect();
        tables.sort_by(|a, b| a.entity.cmp(&b.entity));
        SyncPlan {
            generation: self.generation,
            previous,
            tables,
            links: self.links.clone(),
        }
    }
}

/// A retired generation owns its tables: they are dropped with the last
/// reference to it, so it keeps serving readers that still hold it.
impl Drop for ModelSet {
    fn drop(&mut self) {
        if self.generation == 0 || !self.retired.load(Ordering::Acquire) {
            return;
        }
        match self.backend.drop_generation(self.generation) {
            Ok(()) => debug!("Released generation {}", self.generation),
            Err(err) => warn!("Could not drop generation {}: {}", self.generation, err),
        }
    }
}

/// Column holding the owner's id on the target of a `HasOne`/`HasMany`.
///
/// `through`, when set, names the target's `BelongsTo` back to the source.
/// Otherwise the only such `BelongsTo` is used, or `{source}Id` when there
/// is none. Several candidates without `through` are rejected.
fn target_foreign_key(descriptor: &AssociationDescriptor, target: &SchemaDefinition) -> Result<String, RegistrationError> {
    let candidates: Vec<String> = target
        .associations()
        .into_iter()
        .filter(|inverse| inverse.kind == AssociationKind::BelongsTo && inverse.target == descriptor.source)
        .map(|inverse| inverse.property)
        .collect();

    if let Some(named) = descriptor.through.as_deref().filter(|t| !t.is_empty()) {
        return if candidates.iter().any(|c| c == named) {
            Ok(named.to_string())
        } else {
            Err(RegistrationError::InvalidInverse {
                entity: descriptor.source.clone(),
                property: descriptor.property.clone(),
                inverse: format!("{}.{}", descriptor.target, named),
            })
        };
    }

    match candidates.as_slice() {
        [] => Ok(format!("{}Id", descriptor.source)),
        [only] => Ok(only.clone()),
        _ => Err(RegistrationError::AmbiguousInverse {
            entity: descriptor.source.clone(),
            property: descriptor.property.clone(),
            candidates,
        }),
    }
}

pub struct ModelRegistry;

impl ModelRegistry {
    pub fn register(
        definitions: &[SchemaDefinition],
        validators: ValidatorRegistry,
        generation: u64,
        backend: Arc<dyn StorageBackend>,
        adapter: &dyn RelationAdapter,
    ) -> Result<ModelSet, RegistrationError> {
        let mut by_id: HashMap<String, Arc<SchemaDefinition>> = HashMap::new();
        let mut models: HashMap<String, Model> = HashMap::new();

        // Pass one: a model per collection.
        for definition in definitions {
            let definition = Arc::new(definition.clone());
            if by_id.insert(definition.id.clone(), definition.clone()).is_some() {
                return Err(RegistrationError::DuplicateEntity(definition.id.clone()));
            }
            if definition.kind.is_relational() {
                models.insert(definition.id.clone(), Model::from_definition(definition, generation));
            }
        }

        // Pass two: resolve targets and place keys before models are frozen.
        let mut plans: Vec<(AssociationDescriptor, PlannedStorage)> = Vec::new();
        let mut links: Vec<LinkSpec> = Vec::new();
        for definition in definitions.iter().filter(|d| d.kind.is_relational()) {
            for descriptor in definition.associations() {
                let Some(target) = by_id.get(&descriptor.target) else {
                    return Err(RegistrationError::UnresolvedTarget {
                        entity: descriptor.source,
                        property: descriptor.property,
                        target: descriptor.target,
                    });
                };
                if !target.kind.is_relational() {
                    return Err(RegistrationError::TargetNotRelational {
                        entity: descriptor.source,
                        property: descriptor.property,
                        target: descriptor.target,
                    });
                }

                let planned = match descriptor.kind {
                    AssociationKind::BelongsTo => PlannedStorage::Source(descriptor.property.clone()),
                    AssociationKind::HasOne | AssociationKind::HasMany => {
                        let column = target_foreign_key(&descriptor, target)?;
                        if let Some(model) = models.get_mut(&descriptor.target) {
                            model.table.add_column(ColumnSpec::text(column.clone()), true);
                        }
                        PlannedStorage::Target(column)
                    }
                    AssociationKind::BelongsToMany => {
                        // The compiler guarantees `through` for this kind.
                        let through = descriptor.through.clone().unwrap_or_default();
                        let link = LinkSpec { through, generation };
                        if !links.contains(&link) {
                            links.push(link.clone());
                        }
                        PlannedStorage::Link(link)
                    }
                };
                debug!(
                    "Resolved {}.{} ({}) -> {}",
                    descriptor.source, descriptor.property, descriptor.kind, descriptor.target
                );
                plans.push((descriptor, planned));
            }
        }

        let models: HashMap<String, Arc<Model>> = models.into_iter().map(|(id, m)| (id, Arc::new(m))).collect();

        let mut accessors: HashMap<String, HashMap<String, AccessorEntry>> = HashMap::new();
        for (descriptor, planned) in plans {
            let (Some(source), Some(target)) = (models.get(&descriptor.source), models.get(&descriptor.target)) else {
                return Err(RegistrationError::UnresolvedTarget {
                    entity: descriptor.source,
                    property: descriptor.property,
                    target: descriptor.target,
                });
            };
            let wiring = RelationWiring {
                descriptor: descriptor.clone(),
                source: source.clone(),
                target: target.clone(),
                storage: planned.into_storage(),
                backend: backend.clone(),
            };
            let entry = AccessorEntry::assemble(descriptor.clone(), adapter.wire(&wiring))?;
            accessors
                .entry(descriptor.source)
                .or_default()
                .insert(descriptor.property, entry);
        }

        info!(
            "Registered generation {}: {} model(s), {} accessor(s), {} link table(s)",
            generation,
            models.len(),
            accessors.values().map(HashMap::len).sum::<usize>(),
            links.len()
        );

        Ok(ModelSet {
            generation,
            models,
            accessors,
            definitions: by_id,
            validators,
            links,
            backend,
            retired: AtomicBool::new(false),
        })
    }
}

enum PlannedStorage {
    Source(String),
    Target(String),
    Link(LinkSpec),
}

impl PlannedStorage {
    fn into_storage(self) -> RelationStorage {
        match self {
            Self::Source(column) => RelationStorage::SourceColumn(column),
            Self::Target(column) => RelationStorage::TargetColumn(column),
            Self::Link(link) => RelationStorage::Link(link),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawSchemaEntry, SchemaCompiler};
    use crate::storage::SledStore;
    use serde_json::{json, Value as JsonValue};

    fn collection(id: &str, properties: JsonValue) -> RawSchemaEntry {
        RawSchemaEntry::new(json!({
            "id": id,
            "type": "collection",
            "name": id,
            "collectiveName": format!("{}s", id),
            "files": format!("{}/*.yml", id),
            "properties": properties
        }))
    }

    fn register(entries: &[RawSchemaEntry]) -> Result<ModelSet, RegistrationError> {
        let compiled = SchemaCompiler::new().compile_all(entries, 1).unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(SledStore::temporary().unwrap());
        ModelRegistry::register(&compiled.definitions, compiled.validators, 1, backend, &StoreRelationAdapter)
    }

    fn project_and_task() -> Vec<RawSchemaEntry> {
        vec![
            collection(
                "project",
                json!({"tasks": {"type": "association", "relationship": "HasMany", "target": "task"}}),
            ),
            collection(
                "task",
                json!({
                    "owner": {"type": "association", "relationship": "BelongsTo", "target": "project"},
                    "labels": {"type": "association", "relationship": "BelongsToMany", "target": "label", "through": "task_labels"}
                }),
            ),
            collection(
                "label",
                json!({"tasks": {"type": "association", "relationship": "BelongsToMany", "target": "task", "through": "task_labels"}}),
            ),
        ]
    }

    #[test]
    fn has_many_reuses_inverse_belongs_to_column() {
        let set = register(&project_and_task()).unwrap();
        let task = set.model("task").unwrap();
        assert!(task.table.has_column("owner"));
        assert!(!task.table.has_column("projectId"));
        assert!(set.resolve_accessor("project", "tasks").unwrap().multi().is_some());
        assert!(set.resolve_accessor("task", "owner").unwrap().single().is_some());
    }

    #[test]
    fn has_many_without_inverse_adds_entity_id_column() {
        let set = register(&[
            collection(
                "team",
                json!({"members": {"type": "association", "relationship": "HasMany", "target": "person"}}),
            ),
            collection("person", json!({})),
        ])
        .unwrap();
        let person = set.model("person").unwrap();
        assert!(person.table.has_column("teamId"));
        assert!(person.table.is_indexed("teamId"));
    }

    fn reviewed_task(has_many: JsonValue) -> Vec<RawSchemaEntry> {
        vec![
            collection("user", json!({"tasks": has_many})),
            collection(
                "task",
                json!({
                    "author": {"type": "association", "relationship": "BelongsTo", "target": "user"},
                    "reviewer": {"type": "association", "relationship": "BelongsTo", "target": "user"}
                }),
            ),
        ]
    }

    #[test]
    fn two_inverse_columns_need_through() {
        let entries = reviewed_task(json!({"type": "association", "relationship": "HasMany", "target": "task"}));
        match register(&entries) {
            Err(RegistrationError::AmbiguousInverse { entity, property, candidates }) => {
                assert_eq!((entity.as_str(), property.as_str()), ("user", "tasks"));
                let mut candidates = candidates;
                candidates.sort();
                assert_eq!(candidates, vec!["author", "reviewer"]);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("registration should fail"),
        }

        let set = register(&reviewed_task(json!({
            "type": "association", "relationship": "HasMany", "target": "task", "through": "reviewer"
        })))
        .unwrap();
        assert!(set.model("task").unwrap().table.is_indexed("reviewer"));
        assert!(!set.model("task").unwrap().table.has_column("userId"));

        let wrong = register(&reviewed_task(json!({
            "type": "association", "relationship": "HasMany", "target": "task", "through": "owner"
        })));
        assert!(matches!(wrong, Err(RegistrationError::InvalidInverse { ref inverse, .. }) if inverse == "task.owner"));
    }

    #[test]
    fn shared_through_table_is_planned_once() {
        let set = register(&project_and_task()).unwrap();
        let plan = set.sync_plan(None);
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].through, "task_labels");
        assert_eq!(plan.tables.len(), 3);
    }

    #[test]
    fn unresolved_target_rejects_everything() {
        let mut entries = project_and_task();
        entries.push(collection(
            "comment",
            json!({"author": {"type": "association", "relationship": "BelongsTo", "target": "ghost"}}),
        ));
        match register(&entries) {
            Err(RegistrationError::UnresolvedTarget { entity, property, target }) => {
                assert_eq!((entity.as_str(), property.as_str(), target.as_str()), ("comment", "author", "ghost"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("registration should fail"),
        }
    }

    #[test]
    fn singleton_target_is_not_relational() {
        let settings = RawSchemaEntry::new(json!({"id": "settings", "type": "singleton", "name": "Settings"}));
        let result = register(&[
            collection(
                "task",
                json!({"config": {"type": "association", "relationship": "BelongsTo", "target": "settings"}}),
            ),
            settings,
        ]);
        assert!(matches!(result, Err(RegistrationError::TargetNotRelational { .. })));
    }

    #[test]
    fn unknown_accessor_is_reported() {
        let set = register(&project_and_task()).unwrap();
        let err = set.resolve_accessor("project", "milestones").unwrap_err();
        assert_eq!(err.to_string(), "no association accessor for 'project.milestones'");
        assert!(set.virtual_includes("ghost").is_empty());
    }

    struct ReadOnlyAdapter;

    impl RelationAdapter for ReadOnlyAdapter {
        fn wire(&self, wiring: &RelationWiring) -> AccessorParts {
            let mut parts = StoreRelationAdapter.wire(wiring);
            parts.set_one = None;
            parts.set_many = None;
            parts
        }
    }

    #[test]
    fn incomplete_adapter_fails_registration() {
        let compiled = SchemaCompiler::new().compile_all(&project_and_task(), 1).unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(SledStore::temporary().unwrap());
        let result = ModelRegistry::register(&compiled.definitions, compiled.validators, 1, backend, &ReadOnlyAdapter);
        assert!(matches!(
            result,
            Err(RegistrationError::IncompleteAccessor { missing, .. }) if missing == vec!["set"]
        ));
    }
}
