use super::adapter::{RelationAdapter, StoreRelationAdapter};
use super::{ModelRegistry, ModelSet};
use crate::error::{ModelResult, StorageError};
use crate::schema::{RawSchemaEntry, SchemaCompiler};
use crate::storage::StorageBackend;
use log::{debug, error, info};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Shared entry point to the current registry generation.
///
/// Readers take a snapshot with [`RegistryHandle::current`] and keep it for
/// the duration of a request. [`RegistryHandle::reload`] builds the next
/// generation off to the side and publishes it with a single swap; reloads
/// are serialized. A replaced generation's tables stay until its last
/// snapshot is dropped.
pub struct RegistryHandle {
    backend: Arc<dyn StorageBackend>,
    compiler: SchemaCompiler,
    adapter: Arc<dyn RelationAdapter>,
    current: RwLock<Arc<ModelSet>>,
    /// Last published generation
    reload_lock: Mutex<u64>,
}

impl RegistryHandle {
    pub fn new(backend: Arc<dyn StorageBackend>, compiler: SchemaCompiler) -> Self {
        Self::with_adapter(backend, compiler, Arc::new(StoreRelationAdapter))
    }

    pub fn with_adapter(
        backend: Arc<dyn StorageBackend>,
        compiler: SchemaCompiler,
        adapter: Arc<dyn RelationAdapter>,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(ModelSet::empty(backend.clone()))),
            backend,
            compiler,
            adapter,
            reload_lock: Mutex::new(0),
        }
    }

    /// Creates a handle and publishes a first generation from `entries`.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        compiler: SchemaCompiler,
        entries: Vec<RawSchemaEntry>,
    ) -> ModelResult<Self> {
        let handle = Self::new(backend, compiler);
        handle.reload(entries).await?;
        Ok(handle)
    }

    pub fn current(&self) -> Arc<ModelSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Compiles, registers and syncs a new generation, then swaps it in.
    ///
    /// On any failure the current generation stays published and untouched.
    pub async fn reload(&self, entries: Vec<RawSchemaEntry>) -> ModelResult<Arc<ModelSet>> {
        let mut last = self.reload_lock.lock().await;
        let generation = *last + 1;
        info!("Rebuilding registry generation {} from {} schema(s)", generation, entries.len());

        let compiled = self.compiler.compile_all(&entries, generation)?;
        let next = ModelRegistry::register(
            &compiled.definitions,
            compiled.validators,
            generation,
            self.backend.clone(),
            self.adapter.as_ref(),
        )?;

        let previous = (*last > 0).then_some(*last);
        let plan = next.sync_plan(previous);
        let backend = self.backend.clone();
        let synced = tokio::task::spawn_blocking(move || backend.sync_tables(&plan))
            .await
            .map_err(|e| StorageError::Database {
                operation: "sync".into(),
                message: e.to_string(),
            })
            .and_then(|result| result);
        if let Err(err) = synced {
            // Dropping the retired `next` removes the partial trees.
            next.retire();
            error!("Sync of generation {} failed: {}", generation, err);
            return Err(err.into());
        }

        let next = Arc::new(next);
        let retired = {
            let mut current = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *current, next.clone())
        };
        retired.retire();
        *last = generation;
        info!("Published registry generation {}", generation);

        // Readers still holding the old snapshot keep its tables; they go
        // with the last reference.
        if Arc::strong_count(&retired) > 1 {
            debug!("Generation {} still in use, keeping its tables", retired.generation());
        }
        drop(retired);

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::storage::SledStore;
    use serde_json::json;

    fn entry(properties: serde_json::Value) -> RawSchemaEntry {
        RawSchemaEntry::new(json!({
            "id": "note",
            "type": "collection",
            "name": "Note",
            "collectiveName": "Notes",
            "files": "notes/*.md",
            "properties": properties
        }))
    }

    fn handle() -> RegistryHandle {
        let backend: Arc<dyn StorageBackend> = Arc::new(SledStore::temporary().unwrap());
        RegistryHandle::new(backend, SchemaCompiler::new())
    }

    #[tokio::test]
    async fn reload_publishes_next_generation() {
        let handle = handle();
        assert_eq!(handle.current().generation(), 0);

        handle.reload(vec![entry(json!({"body": {"type": "string"}}))]).await.unwrap();
        let first = handle.current();
        assert_eq!(first.generation(), 1);

        handle.reload(vec![entry(json!({"body": {"type": "string"}, "tags": {"type": "array"}}))]).await.unwrap();
        let second = handle.current();
        assert_eq!(second.generation(), 2);
        assert!(second.model("note").unwrap().table.has_column("tags"));
        // The old snapshot is unchanged.
        assert!(!first.model("note").unwrap().table.has_column("tags"));
    }

    #[tokio::test]
    async fn failed_reload_keeps_current_generation() {
        let handle = handle();
        handle.reload(vec![entry(json!({}))]).await.unwrap();

        let broken = entry(json!({"owner": {"type": "association", "relationship": "BelongsTo", "target": "ghost"}}));
        let err = handle.reload(vec![broken]).await.unwrap_err();
        assert!(matches!(err, ModelError::Registration(_)));
        assert_eq!(handle.current().generation(), 1);
        assert!(handle.current().model("note").is_some());
    }

    #[tokio::test]
    async fn replaced_snapshot_keeps_its_tables_until_released() {
        let handle = handle();
        handle.reload(vec![entry(json!({"body": {"type": "string"}}))]).await.unwrap();
        let old = handle.current();
        let table = old.model("note").unwrap().table.clone();
        let row = json!({"id": "n1", "body": "hello"}).as_object().cloned().unwrap();
        old.backend().put_row(&table, "n1", &row).unwrap();

        handle.reload(vec![entry(json!({"body": {"type": "string"}}))]).await.unwrap();
        assert_eq!(handle.current().generation(), 2);
        assert_eq!(old.backend().scan_rows(&table).unwrap().len(), 1);

        let backend = old.backend().clone();
        drop(old);
        assert!(matches!(backend.scan_rows(&table), Err(StorageError::MissingTable(_))));

        // The published generation is never retired, so shutting down keeps it.
        let live = handle.current().model("note").unwrap().table.clone();
        drop(handle);
        assert_eq!(backend.scan_rows(&live).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rows_survive_a_reload() {
        let handle = handle();
        handle.reload(vec![entry(json!({"body": {"type": "string"}}))]).await.unwrap();
        let set = handle.current();
        let table = &set.model("note").unwrap().table;
        let row = json!({"id": "n1", "body": "hello"}).as_object().cloned().unwrap();
        set.backend().put_row(table, "n1", &row).unwrap();

        handle.reload(vec![entry(json!({"body": {"type": "string"}}))]).await.unwrap();
        let next = handle.current();
        let stored = next
            .backend()
            .get_row(&next.model("note").unwrap().table, "N1")
            .unwrap()
            .unwrap();
        assert_eq!(stored["body"], json!("hello"));
    }
}
