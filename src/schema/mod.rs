//! Schema layer: raw configs, meta validation, compilation, and the
//! validation schemas derived from compiled definitions.

pub mod compiler;
pub mod hasher;
pub mod loader;
pub mod meta;
pub mod types;
pub mod validation;

pub use compiler::{CompiledSchema, CompiledSchemaSet, SchemaCompiler};
pub use hasher::SchemaHasher;
pub use loader::load_schema_dir;
pub use meta::MetaValidator;
pub use types::{
    AssociationDescriptor, AssociationKind, AssociationProperty, EntityKind, PropertyDefinition,
    RawProperty, RawSchemaEntry, ScalarProperty, ScalarType, SchemaDefinition, StructuredProperty,
    VirtualProperty, RESERVED_PROPERTIES,
};
pub use validation::{is_valid_id, ValidationRule, ValidationSchema, ValidatorRegistry, ID_PATTERN};

/// Character that may not start an entity id.
pub const DEFAULT_RESERVED_MARKER: char = '_';
