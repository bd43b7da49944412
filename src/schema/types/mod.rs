pub mod definition;
pub mod property;
pub mod raw;

pub use definition::{AssociationDescriptor, EntityKind, SchemaDefinition, RESERVED_PROPERTIES};
pub use property::{
    AssociationKind, AssociationProperty, PropertyDefinition, ScalarProperty, ScalarType,
    StructuredProperty, VirtualProperty,
};
pub use raw::{RawProperty, RawSchemaEntry};
