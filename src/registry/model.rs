use crate::error::VirtualFieldError;
use crate::query::ColumnCatalog;
use crate::schema::{AssociationKind, SchemaDefinition};
use crate::storage::{ColumnSpec, Row, TableSpec};
use crate::virtual_field::{project, VirtualColumn};
use std::sync::Arc;

/// A relation referenced by a virtual field's params. Document loads embed
/// the related instance(s) under `relation_alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualInclude {
    pub target_entity_id: String,
    pub relation_alias: String,
}

/// The relational model of one collection entity in one generation.
#[derive(Debug, Clone)]
pub struct Model {
    pub definition: Arc<SchemaDefinition>,
    pub table: TableSpec,
    pub virtuals: Vec<VirtualColumn>,
    pub virtual_includes: Vec<VirtualInclude>,
}

impl Model {
    /// Builds the model's own columns. Foreign keys other models place on
    /// this table are added during registration.
    pub fn from_definition(definition: Arc<SchemaDefinition>, generation: u64) -> Self {
        let mut table = TableSpec::new(definition.id.clone(), generation);
        for (name, property) in definition.physical_columns() {
            if let Some(column) = ColumnSpec::from_property(name, property) {
                table.add_column(column, property.is_indexed());
            }
        }

        let virtuals = VirtualColumn::from_definition(&definition);
        let mut virtual_includes = Vec::new();
        for assoc in definition.associations() {
            if assoc.kind == AssociationKind::BelongsTo {
                table.add_column(ColumnSpec::text(assoc.property.clone()), true);
            }
            if virtuals.iter().any(|v| v.masked.contains(&assoc.property)) {
                virtual_includes.push(VirtualInclude {
                    target_entity_id: assoc.target,
                    relation_alias: assoc.property,
                });
            }
        }

        Self {
            virtuals,
            definition,
            table,
            virtual_includes,
        }
    }

    pub fn entity(&self) -> &str {
        &self.definition.id
    }

    pub fn is_virtual(&self, column: &str) -> bool {
        self.virtuals.iter().any(|v| v.name == column)
    }

    pub fn virtual_column(&self, column: &str) -> Option<&VirtualColumn> {
        self.virtuals.iter().find(|v| v.name == column)
    }

    pub fn catalog(&self) -> ColumnCatalog {
        ColumnCatalog::new(
            self.entity().to_string(),
            self.table.columns.iter().map(|c| c.name.clone()),
            self.virtuals.iter().map(|v| v.name.clone()),
        )
    }

    /// Fills every virtual column of `row`.
    pub fn project(&self, row: &mut Row) -> Result<(), VirtualFieldError> {
        project(&self.virtuals, row)
    }
}
