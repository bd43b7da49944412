use super::property::{AssociationKind, PropertyDefinition, VirtualProperty};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reserved property names injected into every relational schema.
pub const RESERVED_PROPERTIES: [&str; 3] = ["id", "shortId", "name"];

/// Kinds of entity a schema config can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Many instances stored in a relational table
    Collection,
    /// A single settings-like document; validated but never tabled
    Singleton,
}

impl EntityKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "collection" => Some(Self::Collection),
            "singleton" => Some(Self::Singleton),
            _ => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Collection)
    }
}

/// A fully compiled entity schema. Immutable once produced by the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub collective_name: Option<String>,
    /// File/selection pattern of the documents backing this entity
    pub files: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub properties: IndexMap<String, PropertyDefinition>,
}

impl SchemaDefinition {
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    /// Resolved association descriptors in declaration order.
    pub fn associations(&self) -> Vec<AssociationDescriptor> {
        self.properties
            .iter()
            .filter_map(|(name, prop)| {
                prop.as_association().map(|assoc| AssociationDescriptor {
                    source: self.id.clone(),
                    property: name.clone(),
                    target: assoc.target.clone(),
                    kind: assoc.kind,
                    through: assoc.through.clone(),
                })
            })
            .collect()
    }

    pub fn virtuals(&self) -> impl Iterator<Item = (&String, &VirtualProperty)> {
        self.properties
            .iter()
            .filter_map(|(name, prop)| prop.as_virtual().map(|v| (name, v)))
    }

    /// Names of the stored columns: scalar, object and array properties.
    pub fn physical_columns(&self) -> impl Iterator<Item = (&String, &PropertyDefinition)> {
        self.properties.iter().filter(|(_, prop)| prop.is_physical())
    }

    pub fn indexed_columns(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, prop)| prop.is_indexed())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_association(&self, name: &str) -> bool {
        matches!(self.property(name), Some(PropertyDefinition::Association(_)))
    }
}

/// Resolved link derived from one association property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssociationDescriptor {
    pub source: String,
    /// Accessor key and externally visible relation alias
    pub property: String,
    pub target: String,
    pub kind: AssociationKind,
    pub through: Option<String>,
}
