//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use dynamodel::registry::{RelationAdapter, StoreRelationAdapter};
use dynamodel::schema::{RawSchemaEntry, SchemaCompiler};
use dynamodel::{DataService, ModelResult, RegistryHandle, SledStore, StorageBackend};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

/// A registry over a temporary sled database, plus a data service on top.
pub struct TestFixture {
    pub handle: Arc<RegistryHandle>,
    pub service: DataService,
    pub backend: Arc<dyn StorageBackend>,
    pub _temp_dir: TempDir,
}

impl TestFixture {
    /// Opens an empty registry (generation 0).
    pub fn empty() -> Self {
        Self::empty_with_adapter(Arc::new(StoreRelationAdapter))
    }

    /// Like [`TestFixture::empty`], wiring associations through `adapter`.
    pub fn empty_with_adapter(adapter: Arc<dyn RelationAdapter>) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let db = sled::Config::new()
            .path(temp_dir.path())
            .temporary(true)
            .open()
            .expect("failed to open temporary database");
        let backend: Arc<dyn StorageBackend> = Arc::new(SledStore::new(db));
        let handle = Arc::new(RegistryHandle::with_adapter(
            backend.clone(),
            SchemaCompiler::new(),
            adapter,
        ));
        Self {
            service: DataService::new(handle.clone()),
            handle,
            backend,
            _temp_dir: temp_dir,
        }
    }

    /// Opens a registry and publishes `entries` as its first generation.
    pub async fn with_schemas(entries: Vec<RawSchemaEntry>) -> ModelResult<Self> {
        let fixture = Self::empty();
        fixture.handle.reload(entries).await?;
        Ok(fixture)
    }

    /// Publishes `entries` with associations wired through `adapter`.
    pub async fn with_adapter(adapter: Arc<dyn RelationAdapter>, entries: Vec<RawSchemaEntry>) -> ModelResult<Self> {
        let fixture = Self::empty_with_adapter(adapter);
        fixture.handle.reload(entries).await?;
        Ok(fixture)
    }

    /// Upserts each document, panicking on the first failure.
    pub async fn seed(&self, entity: &str, documents: Vec<Value>) {
        for document in documents {
            self.service
                .upsert_instance(entity, document)
                .await
                .unwrap_or_else(|e| panic!("seeding '{}' failed: {}", entity, e));
        }
    }
}

/// A collection schema entry with the given properties.
pub fn collection(id: &str, properties: Value) -> RawSchemaEntry {
    RawSchemaEntry::new(json!({
        "id": id,
        "type": "collection",
        "name": id,
        "collectiveName": format!("{}s", id),
        "files": format!("{}/*.yml", id),
        "properties": properties
    }))
}

/// Projects own tasks; tasks carry labels through a shared link table.
pub fn tracker_schemas() -> Vec<RawSchemaEntry> {
    vec![
        collection(
            "project",
            json!({
                "title": {"type": "string", "index": true},
                "tasks": {"type": "association", "relationship": "HasMany", "target": "task"}
            }),
        ),
        collection(
            "task",
            json!({
                "title": {"type": "string"},
                "status": {"type": "string", "enum": ["open", "done"]},
                "estimate": {"type": "integer"},
                "project": {"type": "association", "relationship": "BelongsTo", "target": "project"},
                "labels": {
                    "type": "association",
                    "relationship": "BelongsToMany",
                    "target": "label",
                    "through": "task_labels"
                },
                "headline": {
                    "type": "virtual",
                    "expression": "upper(title) + \" #\" + estimate",
                    "params": ["title", "estimate"]
                },
                "projectRef": {
                    "type": "virtual",
                    "expression": "coalesce(project, \"none\")",
                    "params": ["project"]
                }
            }),
        ),
        collection(
            "label",
            json!({
                "color": {"type": "string"},
                "tasks": {
                    "type": "association",
                    "relationship": "BelongsToMany",
                    "target": "task",
                    "through": "task_labels"
                }
            }),
        ),
    ]
}
