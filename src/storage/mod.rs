//! Abstract storage model and its sled implementation.
//!
//! The registry only talks to a [`StorageBackend`]. Tables are described by
//! [`TableSpec`]s derived from compiled schemas and are namespaced by registry
//! generation, so a rebuild can populate fresh tables while the previous
//! registry keeps serving reads.

pub mod sled_store;

pub use sled_store::SledStore;

use crate::error::StorageError;
use crate::schema::{PropertyDefinition, ScalarType};
use serde_json::Value as JsonValue;

/// One stored instance: column name to JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Number,
    Boolean,
    /// Opaque structured value (object or array)
    Json,
}

/// Comparison rule for a column's values in keys and index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    Binary,
    /// Values are case-folded before comparison
    CaseInsensitive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub collation: Collation,
}

impl ColumnSpec {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
            collation: Collation::CaseInsensitive,
        }
    }

    /// Column for a physical property; `None` for associations and virtuals.
    pub fn from_property(name: &str, property: &PropertyDefinition) -> Option<Self> {
        let kind = match property {
            PropertyDefinition::Scalar(scalar) => match scalar.scalar_type {
                ScalarType::String => return Some(Self::text(name)),
                ScalarType::Integer => ColumnKind::Integer,
                ScalarType::Number => ColumnKind::Number,
                ScalarType::Boolean => ColumnKind::Boolean,
            },
            PropertyDefinition::Object(_) | PropertyDefinition::Array(_) => ColumnKind::Json,
            PropertyDefinition::Association(_) | PropertyDefinition::Virtual(_) => return None,
        };
        Some(Self {
            name: name.to_string(),
            kind,
            collation: Collation::Binary,
        })
    }
}

/// Physical layout of one entity's table in one registry generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub entity: String,
    pub generation: u64,
    pub columns: Vec<ColumnSpec>,
    /// Indexed column names
    pub indexes: Vec<String>,
}

impl TableSpec {
    pub fn new(entity: impl Into<String>, generation: u64) -> Self {
        Self {
            entity: entity.into(),
            generation,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Adds a column unless one with that name already exists.
    pub fn add_column(&mut self, column: ColumnSpec, indexed: bool) {
        if !self.has_column(&column.name) {
            if indexed {
                self.indexes.push(column.name.clone());
            }
            self.columns.push(column);
        }
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i == name)
    }

    /// Collation of a column; unknown columns compare case-insensitively.
    pub fn collation(&self, name: &str) -> Collation {
        self.column(name)
            .map(|c| c.collation)
            .unwrap_or(Collation::CaseInsensitive)
    }
}

/// Join table backing `BelongsToMany` associations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkSpec {
    pub through: String,
    pub generation: u64,
}

/// One side of a link: an instance of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEnd<'a> {
    pub entity: &'a str,
    pub id: &'a str,
}

impl<'a> LinkEnd<'a> {
    pub fn new(entity: &'a str, id: &'a str) -> Self {
        Self { entity, id }
    }
}

/// Everything one registry generation needs created before it can serve.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub generation: u64,
    /// Generation whose rows are carried over into the new tables
    pub previous: Option<u64>,
    pub tables: Vec<TableSpec>,
    pub links: Vec<LinkSpec>,
}

/// Case-folds text for keys and case-insensitive comparison.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Whether a stored value equals `expected` under the given collation.
pub fn values_match(collation: Collation, stored: &JsonValue, expected: &JsonValue) -> bool {
    match (collation, stored, expected) {
        (Collation::CaseInsensitive, JsonValue::String(a), JsonValue::String(b)) => fold(a) == fold(b),
        (_, JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => stored == expected,
    }
}

/// Storage operations the registry and data service need.
///
/// Implementations must not enforce referential integrity: rows are often
/// written before the rows they reference.
pub trait StorageBackend: Send + Sync {
    /// Creates every table, index and link table of a generation, carrying
    /// rows, deferred columns and links over from `plan.previous` when set.
    fn sync_tables(&self, plan: &SyncPlan) -> Result<(), StorageError>;

    /// Drops every table of a generation.
    fn drop_generation(&self, generation: u64) -> Result<(), StorageError>;

    fn put_row(&self, table: &TableSpec, id: &str, row: &Row) -> Result<(), StorageError>;

    fn get_row(&self, table: &TableSpec, id: &str) -> Result<Option<Row>, StorageError>;

    /// Returns whether a row was removed.
    fn delete_row(&self, table: &TableSpec, id: &str) -> Result<bool, StorageError>;

    /// Every row, in primary-key order.
    fn scan_rows(&self, table: &TableSpec) -> Result<Vec<Row>, StorageError>;

    /// Rows whose `column` equals `value` under the column's collation.
    fn rows_where(&self, table: &TableSpec, column: &str, value: &JsonValue) -> Result<Vec<Row>, StorageError>;

    /// Updates one column of an existing row. Returns false if the row is
    /// missing. Concurrent updates of different columns of one row must all
    /// be kept.
    fn set_column(&self, table: &TableSpec, id: &str, column: &str, value: JsonValue) -> Result<bool, StorageError>;

    /// Records a column value for a row that does not exist yet. The next
    /// `put_row` of that id takes it unless the row sets the column itself.
    fn defer_column(&self, table: &TableSpec, id: &str, column: &str, value: JsonValue) -> Result<(), StorageError>;

    /// Folded ids of rows with a deferred `column` equal to `value`.
    fn deferred_ids(&self, table: &TableSpec, column: &str, value: &JsonValue) -> Result<Vec<String>, StorageError>;

    /// Drops the deferred `column` of `id` if it equals `value`. Returns
    /// whether one was dropped.
    fn discard_deferred(&self, table: &TableSpec, id: &str, column: &str, value: &JsonValue)
        -> Result<bool, StorageError>;

    /// Returns whether the pair was newly linked.
    fn link(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError>;

    /// Returns whether the pair was linked before.
    fn unlink(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError>;

    /// Ids of `target_entity` instances linked to `from`, in key order.
    fn linked_ids(&self, link: &LinkSpec, from: LinkEnd<'_>, target_entity: &str) -> Result<Vec<String>, StorageError>;

    fn is_linked(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ScalarProperty, StructuredProperty};
    use serde_json::json;

    #[test]
    fn string_columns_are_case_insensitive() {
        let prop = PropertyDefinition::Scalar(ScalarProperty::new(ScalarType::String));
        let column = ColumnSpec::from_property("title", &prop).unwrap();
        assert_eq!(column.collation, Collation::CaseInsensitive);

        let blob = PropertyDefinition::Object(StructuredProperty { shape: None });
        assert_eq!(ColumnSpec::from_property("meta", &blob).unwrap().kind, ColumnKind::Json);
    }

    #[test]
    fn add_column_is_idempotent() {
        let mut table = TableSpec::new("task", 1);
        table.add_column(ColumnSpec::text("projectId"), true);
        table.add_column(ColumnSpec::text("projectId"), true);
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.indexes, vec!["projectId".to_string()]);
    }

    #[test]
    fn values_match_respects_collation() {
        assert!(values_match(Collation::CaseInsensitive, &json!("ABC"), &json!("abc")));
        assert!(!values_match(Collation::Binary, &json!("ABC"), &json!("abc")));
        assert!(values_match(Collation::Binary, &json!(2), &json!(2.0)));
    }
}
