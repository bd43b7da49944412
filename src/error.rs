//! Unified error handling for the data-model core.
//!
//! Each stage of the pipeline owns a dedicated error type so callers can tell
//! a broken schema (fatal to a reload) apart from a bad instance document or a
//! malformed query (reported per call). [`ModelError`] wraps all of them for
//! call sites that just want to propagate with `?`.

use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigError;

/// A single raw schema entry failed to compile.
///
/// Compilation aggregates every problem found in the entry instead of
/// stopping at the first one, so `problems` is never empty.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("schema '{entity}'{} failed to compile: {}", display_path(.path), .problems.join("; "))]
pub struct SchemaCompileError {
    pub entity: String,
    pub path: Option<PathBuf>,
    pub problems: Vec<String>,
}

impl SchemaCompileError {
    pub fn new(entity: impl Into<String>, path: Option<PathBuf>, problems: Vec<String>) -> Self {
        Self {
            entity: entity.into(),
            path,
            problems,
        }
    }

    pub fn single(entity: impl Into<String>, path: Option<PathBuf>, problem: impl Into<String>) -> Self {
        Self::new(entity, path, vec![problem.into()])
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

/// Every entry that failed during one compile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCompileErrors(pub Vec<SchemaCompileError>);

impl std::error::Error for SchemaCompileErrors {}

impl fmt::Display for SchemaCompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} schema(s) failed to compile", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

/// Model registration failed. Always aborts the whole registry rebuild.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("association '{entity}.{property}' targets unknown entity '{target}'")]
    UnresolvedTarget {
        entity: String,
        property: String,
        target: String,
    },

    #[error("association '{entity}.{property}' targets entity '{target}' which has no relational model")]
    TargetNotRelational {
        entity: String,
        property: String,
        target: String,
    },

    #[error("accessor for '{entity}.{property}' is missing operations: {}", .missing.join(", "))]
    IncompleteAccessor {
        entity: String,
        property: String,
        missing: Vec<&'static str>,
    },

    #[error("'{entity}.{property}' matches several inverse BelongsTo properties ({}); name one with 'through'", .candidates.join(", "))]
    AmbiguousInverse {
        entity: String,
        property: String,
        candidates: Vec<String>,
    },

    #[error("'{entity}.{property}' names '{inverse}' as its inverse, which is not a BelongsTo back to '{entity}'")]
    InvalidInverse {
        entity: String,
        property: String,
        inverse: String,
    },

    #[error("duplicate entity id '{0}'")]
    DuplicateEntity(String),

    #[error("storage sync failed: {0}")]
    Storage(String),
}

/// Reading or writing a virtual field failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VirtualFieldError {
    #[error("virtual field '{entity}.{field}' failed to evaluate: {message}")]
    Evaluation {
        entity: String,
        field: String,
        message: String,
    },

    #[error("virtual field '{entity}.{field}' is read-only")]
    Immutable { entity: String, field: String },
}

/// An instance document does not satisfy its entity's validation schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("instance of '{entity}' failed validation: {}", .errors.join("; "))]
pub struct ValidationFailure {
    pub entity: String,
    pub errors: Vec<String>,
}

/// A query request could not be turned into a [`crate::query::QuerySpec`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryTranslationError {
    #[error("unknown sort direction '{0}'")]
    UnknownSortDirection(String),

    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown column '{column}' on '{entity}'")]
    UnknownColumn { entity: String, column: String },

    #[error("column '{column}' on '{entity}' is virtual and cannot be filtered")]
    VirtualColumn { entity: String, column: String },

    #[error("page size must be greater than zero")]
    ZeroPageSize,

    #[error("page {page} of size {page_size} is out of range")]
    PageOutOfRange { page: usize, page_size: usize },

    #[error("invalid raw predicate: {0}")]
    InvalidPredicate(String),
}

/// An association-scoped call named a property with no registered accessor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no association accessor for '{entity}.{property}'")]
pub struct AccessorNotFound {
    pub entity: String,
    pub property: String,
}

/// Backing-store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("database {operation} failed: {message}")]
    Database { operation: String, message: String },

    #[error("serialization failed for {context}: {message}")]
    Serialization { context: String, message: String },

    #[error("failed to acquire lock for {0}")]
    Lock(String),

    #[error("table '{0}' is not synced")]
    MissingTable(String),
}

impl StorageError {
    pub fn database(operation: &str, error: sled::Error) -> Self {
        Self::Database {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn serialization(context: &str, error: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.to_string(),
            message: error.to_string(),
        }
    }

    /// Helper for `map_err` on sled calls.
    pub fn from_sled(operation: &str) -> impl Fn(sled::Error) -> StorageError + '_ {
        move |e| Self::database(operation, e)
    }

    /// Helper for `map_err` on serde_json calls.
    pub fn from_serde(context: &str) -> impl Fn(serde_json::Error) -> StorageError + '_ {
        move |e| Self::serialization(context, e)
    }
}

/// Unified error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Compile(#[from] SchemaCompileErrors),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    VirtualField(#[from] VirtualFieldError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Query(#[from] QueryTranslationError),

    #[error(transparent)]
    AccessorNotFound(#[from] AccessorNotFound),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<SchemaCompileError> for ModelError {
    fn from(error: SchemaCompileError) -> Self {
        ModelError::Compile(SchemaCompileErrors(vec![error]))
    }
}

impl From<sled::Error> for ModelError {
    fn from(error: sled::Error) -> Self {
        ModelError::Storage(StorageError::database("operation", error))
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(error: serde_json::Error) -> Self {
        ModelError::Storage(StorageError::serialization("json", error))
    }
}

/// Result alias for operations that can fail with a [`ModelError`].
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_lists_every_problem() {
        let err = SchemaCompileError::new(
            "tasks",
            Some(PathBuf::from("schemas/tasks.json")),
            vec!["missing name".to_string(), "bad type".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("tasks"));
        assert!(msg.contains("schemas/tasks.json"));
        assert!(msg.contains("missing name; bad type"));
    }

    #[test]
    fn single_compile_error_converts_to_aggregate() {
        let err: ModelError = SchemaCompileError::single("tasks", None, "oops").into();
        match err {
            ModelError::Compile(SchemaCompileErrors(list)) => assert_eq!(list.len(), 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn incomplete_accessor_names_missing_operations() {
        let err = RegistrationError::IncompleteAccessor {
            entity: "projects".into(),
            property: "tasks".into(),
            missing: vec!["add", "has"],
        };
        assert_eq!(
            err.to_string(),
            "accessor for 'projects.tasks' is missing operations: add, has"
        );
    }
}
