//! Uniform association accessors.
//!
//! Every association resolves to one of two accessor shapes regardless of
//! how its relation is stored. The operations are plain closures so a
//! [`super::RelationAdapter`] can bind them to any storage layout.

use crate::error::{ModelResult, RegistrationError};
use crate::query::{Predicate, QuerySpec};
use crate::schema::AssociationDescriptor;
use crate::storage::Row;
use std::fmt;
use std::sync::Arc;

pub type SingleGetFn = Arc<dyn Fn(&str) -> ModelResult<Option<Row>> + Send + Sync>;
pub type SingleSetFn = Arc<dyn Fn(&str, Option<&str>) -> ModelResult<()> + Send + Sync>;
pub type MultiGetFn = Arc<dyn Fn(&str, &QuerySpec) -> ModelResult<Vec<Row>> + Send + Sync>;
pub type MultiMutateFn = Arc<dyn Fn(&str, &[String]) -> ModelResult<()> + Send + Sync>;
pub type CountFn = Arc<dyn Fn(&str, Option<&Predicate>) -> ModelResult<usize> + Send + Sync>;
pub type HasFn = Arc<dyn Fn(&str, &str) -> ModelResult<bool> + Send + Sync>;

/// Accessor for `HasOne` and `BelongsTo`.
#[derive(Clone)]
pub struct SingleAccessor {
    get: SingleGetFn,
    set: SingleSetFn,
}

impl SingleAccessor {
    pub fn get(&self, instance_id: &str) -> ModelResult<Option<Row>> {
        (self.get)(instance_id)
    }

    /// `None` clears the relation.
    pub fn set(&self, instance_id: &str, target_id: Option<&str>) -> ModelResult<()> {
        (self.set)(instance_id, target_id)
    }
}

/// Accessor for `HasMany` and `BelongsToMany`.
#[derive(Clone)]
pub struct MultiAccessor {
    get: MultiGetFn,
    set: MultiMutateFn,
    add: MultiMutateFn,
    remove: MultiMutateFn,
    count: CountFn,
    has: HasFn,
}

impl MultiAccessor {
    /// Related rows, filtered, sorted and paged by `spec`.
    pub fn get(&self, instance_id: &str, spec: &QuerySpec) -> ModelResult<Vec<Row>> {
        (self.get)(instance_id, spec)
    }

    /// Replaces the related set with exactly `targets`.
    pub fn set(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        (self.set)(instance_id, targets)
    }

    /// Adds members; existing members are left as they are.
    pub fn add(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        (self.add)(instance_id, targets)
    }

    pub fn remove(&self, instance_id: &str, targets: &[String]) -> ModelResult<()> {
        (self.remove)(instance_id, targets)
    }

    /// Always equals the length of an unpaged `get` with the same predicate.
    pub fn count(&self, instance_id: &str, predicate: Option<&Predicate>) -> ModelResult<usize> {
        (self.count)(instance_id, predicate)
    }

    pub fn has(&self, instance_id: &str, target_id: &str) -> ModelResult<bool> {
        (self.has)(instance_id, target_id)
    }
}

#[derive(Clone)]
pub enum Accessor {
    Single(SingleAccessor),
    Multi(MultiAccessor),
}

/// A registered accessor and the association it serves.
#[derive(Clone)]
pub struct AccessorEntry {
    pub descriptor: AssociationDescriptor,
    pub accessor: Accessor,
}

impl AccessorEntry {
    pub fn single(&self) -> Option<&SingleAccessor> {
        match &self.accessor {
            Accessor::Single(single) => Some(single),
            Accessor::Multi(_) => None,
        }
    }

    pub fn multi(&self) -> Option<&MultiAccessor> {
        match &self.accessor {
            Accessor::Multi(multi) => Some(multi),
            Accessor::Single(_) => None,
        }
    }

    /// Builds the entry from adapter-supplied operations. The shape follows
    /// the association kind, and every operation of that shape is required.
    pub fn assemble(descriptor: AssociationDescriptor, parts: AccessorParts) -> Result<Self, RegistrationError> {
        let mut missing = Vec::new();
        let accessor = if descriptor.kind.is_multi() {
            check(&parts.get_many, "get", &mut missing);
            check(&parts.set_many, "set", &mut missing);
            check(&parts.add, "add", &mut missing);
            check(&parts.remove, "remove", &mut missing);
            check(&parts.count, "count", &mut missing);
            check(&parts.has, "has", &mut missing);
            match (parts.get_many, parts.set_many, parts.add, parts.remove, parts.count, parts.has) {
                (Some(get), Some(set), Some(add), Some(remove), Some(count), Some(has)) => {
                    Some(Accessor::Multi(MultiAccessor {
                        get,
                        set,
                        add,
                        remove,
                        count,
                        has,
                    }))
                }
                _ => None,
            }
        } else {
            check(&parts.get_one, "get", &mut missing);
            check(&parts.set_one, "set", &mut missing);
            match (parts.get_one, parts.set_one) {
                (Some(get), Some(set)) => Some(Accessor::Single(SingleAccessor { get, set })),
                _ => None,
            }
        };

        match accessor {
            Some(accessor) => Ok(Self { descriptor, accessor }),
            None => Err(RegistrationError::IncompleteAccessor {
                entity: descriptor.source,
                property: descriptor.property,
                missing,
            }),
        }
    }
}

impl fmt::Debug for AccessorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.accessor {
            Accessor::Single(_) => "single",
            Accessor::Multi(_) => "multi",
        };
        f.debug_struct("AccessorEntry")
            .field("descriptor", &self.descriptor)
            .field("shape", &shape)
            .finish()
    }
}

fn check<T>(part: &Option<T>, name: &'static str, missing: &mut Vec<&'static str>) {
    if part.is_none() {
        missing.push(name);
    }
}

/// Operations an adapter wires for one association. Single-valued kinds use
/// `get_one`/`set_one`, multi-valued kinds the rest.
#[derive(Default)]
pub struct AccessorParts {
    pub get_one: Option<SingleGetFn>,
    pub set_one: Option<SingleSetFn>,
    pub get_many: Option<MultiGetFn>,
    pub set_many: Option<MultiMutateFn>,
    pub add: Option<MultiMutateFn>,
    pub remove: Option<MultiMutateFn>,
    pub count: Option<CountFn>,
    pub has: Option<HasFn>,
}
