use crate::expression::CompiledExpression;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Primitive value type of a scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ScalarType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarProperty {
    pub scalar_type: ScalarType,
    pub enum_values: Option<Vec<JsonValue>>,
    pub index: bool,
    pub max_length: Option<usize>,
}

impl ScalarProperty {
    pub fn new(scalar_type: ScalarType) -> Self {
        Self {
            scalar_type,
            enum_values: None,
            index: false,
            max_length: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }
}

/// Object or array property. The nested shape is kept as authored and never
/// decomposed into relational columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredProperty {
    pub shape: Option<JsonValue>,
}

/// Relationship kinds an association property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
}

impl AssociationKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "HasOne" | "hasOne" => Some(Self::HasOne),
            "HasMany" | "hasMany" => Some(Self::HasMany),
            "BelongsTo" | "belongsTo" => Some(Self::BelongsTo),
            "BelongsToMany" | "belongsToMany" => Some(Self::BelongsToMany),
            _ => None,
        }
    }

    /// `HasMany` and `BelongsToMany` hold a set of targets.
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::HasMany | Self::BelongsToMany)
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HasOne => "HasOne",
            Self::HasMany => "HasMany",
            Self::BelongsTo => "BelongsTo",
            Self::BelongsToMany => "BelongsToMany",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationProperty {
    pub kind: AssociationKind,
    pub target: String,
    /// Join entity, required for `BelongsToMany`
    pub through: Option<String>,
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Computed, read-only property.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualProperty {
    pub expression: CompiledExpression,
    /// Names the expression may reference, in declaration order
    pub params: Vec<String>,
}

/// One property of a compiled schema.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDefinition {
    Scalar(ScalarProperty),
    Object(StructuredProperty),
    Array(StructuredProperty),
    Association(AssociationProperty),
    Virtual(VirtualProperty),
}

impl PropertyDefinition {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Scalar(ScalarProperty { index: true, .. }))
    }

    pub fn as_association(&self) -> Option<&AssociationProperty> {
        match self {
            Self::Association(assoc) => Some(assoc),
            _ => None,
        }
    }

    pub fn as_virtual(&self) -> Option<&VirtualProperty> {
        match self {
            Self::Virtual(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the property is a stored column of the owning row.
    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Object(_) | Self::Array(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(s) => match s.scalar_type {
                ScalarType::String => "string",
                ScalarType::Integer => "integer",
                ScalarType::Number => "number",
                ScalarType::Boolean => "boolean",
            },
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Association(_) => "association",
            Self::Virtual(_) => "virtual",
        }
    }
}
