//! Data service: the read and write paths exposed to data-entry surfaces.
//!
//! Storage and accessor calls are synchronous, so every operation runs its
//! storage work on tokio's blocking pool against a registry snapshot taken
//! at the start of the call.

pub mod includes;
pub mod load;
pub mod write;

pub use includes::{with_virtual_includes, DocumentQuery};
pub use load::{LoadRequest, LoadResult, RelationScope};
pub use write::{BulkLoadFailure, BulkLoadReport};

use crate::error::{ModelError, ModelResult, StorageError};
use crate::query::QueryTranslator;
use crate::registry::{Model, ModelSet, RegistryHandle};
use std::sync::Arc;

pub struct DataService {
    handle: Arc<RegistryHandle>,
    translator: QueryTranslator,
}

impl DataService {
    pub fn new(handle: Arc<RegistryHandle>) -> Self {
        Self {
            handle,
            translator: QueryTranslator::default(),
        }
    }

    pub fn with_page_size(handle: Arc<RegistryHandle>, default_page_size: usize) -> Self {
        Self {
            handle,
            translator: QueryTranslator::new(default_page_size),
        }
    }

    pub fn handle(&self) -> &Arc<RegistryHandle> {
        &self.handle
    }

    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }
}

pub(crate) fn model_for(set: &ModelSet, entity: &str) -> ModelResult<Arc<Model>> {
    set.model(entity)
        .cloned()
        .ok_or_else(|| ModelError::NotFound(format!("entity '{}'", entity)))
}

/// Runs synchronous storage work on the blocking pool.
pub(crate) async fn blocking<T, F>(operation: &str, work: F) -> ModelResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ModelResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        ModelError::Storage(StorageError::Database {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    })?
}
