//! # dynamodel
//!
//! A schema-driven data model. Entity schemas are declared as JSON configs,
//! compiled into typed definitions and registered as relational models at
//! runtime. Associations between entities are reached through uniform
//! accessors, and client data requests are translated into backend-agnostic
//! queries.
//!
//! ## Core Components
//!
//! * `schema` - Raw schema configs, compilation and validation schemas
//! * `expression` - Sandboxed expression language used by virtual fields
//! * `virtual_field` - Derived, read-only fields computed per row
//! * `storage` - Storage backend abstraction and the sled backend
//! * `registry` - Model registry, association accessors and the reloadable handle
//! * `query` - Query requests, predicates, translation and execution
//! * `service` - Read and write paths over the current registry
//! * `config`, `logging`, `error` - Ambient configuration, logging and errors
//!
//! ## Lifecycle
//!
//! A [`RegistryHandle`] compiles a directory of schema configs, registers a
//! model for every collection entity and syncs its tables. A reload builds
//! the next generation beside the current one and swaps it in atomically, so
//! readers always see one complete registry.

pub mod config;
pub mod error;
pub mod expression;
pub mod logging;
pub mod query;
pub mod registry;
pub mod schema;
pub mod service;
pub mod storage;
pub mod virtual_field;

// Re-export main types for convenience
pub use config::{ConfigError, ModelConfig};
pub use error::{
    AccessorNotFound, ModelError, ModelResult, QueryTranslationError, RegistrationError, SchemaCompileError,
    SchemaCompileErrors, StorageError, ValidationFailure, VirtualFieldError,
};
pub use logging::{init_logging, LogConfig};
pub use query::{Filter, Predicate, QueryRequest, QuerySpec, QueryTranslator, SortDirection};
pub use registry::{AccessorEntry, ModelRegistry, ModelSet, MultiAccessor, RegistryHandle, SingleAccessor};
pub use schema::{load_schema_dir, RawSchemaEntry, SchemaCompiler, SchemaDefinition};
pub use service::{BulkLoadReport, DataService, LoadRequest, LoadResult, RelationScope};
pub use storage::{SledStore, StorageBackend};
