use super::includes::{embed, with_virtual_includes, DocumentQuery};
use super::{blocking, model_for, DataService};
use crate::error::ModelResult;
use crate::query::{self, QueryRequest};
use crate::registry::Accessor;
use crate::storage::Row;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Restricts a load to the targets of one association of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationScope {
    pub instance_id: String,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationScope>,
    #[serde(flatten)]
    pub query: QueryRequest,
}

impl LoadRequest {
    pub fn entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            relation: None,
            query: QueryRequest::default(),
        }
    }

    pub fn scoped(entity: impl Into<String>, instance_id: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            relation: Some(RelationScope {
                instance_id: instance_id.into(),
                property: property.into(),
            }),
            ..Self::entity(entity)
        }
    }

    pub fn with_query(mut self, query: QueryRequest) -> Self {
        self.query = query;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub data: Vec<Row>,
    pub page: usize,
    pub total_count: usize,
}

impl DataService {
    /// Loads one page of an entity, or of one instance's relation.
    ///
    /// The query is translated before any storage call, so a malformed
    /// request never touches the backend.
    pub async fn load_data(&self, request: LoadRequest) -> ModelResult<LoadResult> {
        let set = self.handle.current();
        let page = request.query.page;

        match request.relation {
            None => {
                let model = model_for(&set, &request.entity)?;
                let spec = self.translator.translate(&request.query, &model.catalog())?;
                let entity = request.entity.clone();
                let (data, total_count) = blocking("load", move || {
                    let rows = set.backend().scan_rows(&model.table)?;
                    let mut outcome = query::execute(rows, &spec, &model.virtuals)?;
                    embed(&set, &entity, &mut outcome.rows, &spec.includes)?;
                    Ok((outcome.rows, outcome.total_count))
                })
                .await?;
                debug!("Loaded {} of {} '{}' row(s)", data.len(), total_count, request.entity);
                Ok(LoadResult {
                    data,
                    page,
                    total_count,
                })
            }
            Some(scope) => {
                let entry = set.resolve_accessor(&request.entity, &scope.property)?.clone();
                let target = model_for(&set, &entry.descriptor.target)?;
                let spec = self.translator.translate(&request.query, &target.catalog())?;
                let property = scope.property.clone();
                let (data, total_count) = blocking("load relation", move || {
                    let (mut rows, total) = match &entry.accessor {
                        Accessor::Multi(multi) => {
                            let total = multi.count(&scope.instance_id, spec.predicate.as_ref())?;
                            (multi.get(&scope.instance_id, &spec)?, total)
                        }
                        Accessor::Single(single) => {
                            let related: Vec<Row> = single.get(&scope.instance_id)?.into_iter().collect();
                            let outcome = query::execute(related, &spec, &[])?;
                            (outcome.rows, outcome.total_count)
                        }
                    };
                    embed(&set, &entry.descriptor.target, &mut rows, &spec.includes)?;
                    Ok((rows, total))
                })
                .await?;
                debug!(
                    "Loaded {} of {} row(s) of '{}.{}'",
                    data.len(),
                    total_count,
                    request.entity,
                    property
                );
                Ok(LoadResult {
                    data,
                    page,
                    total_count,
                })
            }
        }
    }

    /// Loads one instance with the relations its virtual fields reference
    /// embedded, for document templating.
    pub async fn load_document(&self, entity: &str, id: &str) -> ModelResult<Option<Row>> {
        let set = self.handle.current();
        let model = model_for(&set, entity)?;
        let backend = set.backend().clone();
        let base: DocumentQuery = Arc::new(move |id: &str| match backend.get_row(&model.table, id)? {
            Some(mut row) => {
                model.project(&mut row)?;
                Ok(Some(row))
            }
            None => Ok(None),
        });
        let query = with_virtual_includes(set, entity, base);
        let id = id.to_string();
        blocking("load document", move || query(&id)).await
    }
}
