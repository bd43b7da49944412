//! Turns a [`QueryRequest`] into a backend-agnostic [`QuerySpec`].

use super::predicate::{Comparison, Predicate};
use super::request::QueryRequest;
use crate::error::QueryTranslationError;
use log::debug;
use serde_json::Value as JsonValue;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Matches on the case-insensitive prefix: `asc`, `ASCENDING` and `Desc`
    /// are all accepted.
    pub fn parse(raw: &str) -> Result<Self, QueryTranslationError> {
        let lowered = raw.trim().to_lowercase();
        if lowered.starts_with("asc") {
            Ok(Self::Asc)
        } else if lowered.starts_with("des") {
            Ok(Self::Desc)
        } else {
            Err(QueryTranslationError::UnknownSortDirection(raw.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

/// Translated query, ready for any backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub predicate: Option<Predicate>,
    pub includes: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Option<SortSpec>,
}

impl QuerySpec {
    /// Every row, unsorted.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Columns a query against one entity may reference.
#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    entity: String,
    physical: HashSet<String>,
    virtuals: HashSet<String>,
}

impl ColumnCatalog {
    pub fn new<P, V>(entity: impl Into<String>, physical: P, virtuals: V) -> Self
    where
        P: IntoIterator<Item = String>,
        V: IntoIterator<Item = String>,
    {
        Self {
            entity: entity.into(),
            physical: physical.into_iter().collect(),
            virtuals: virtuals.into_iter().collect(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn is_virtual(&self, column: &str) -> bool {
        self.virtuals.contains(column)
    }

    fn check_filterable(&self, column: &str) -> Result<(), QueryTranslationError> {
        if self.physical.contains(column) {
            Ok(())
        } else if self.virtuals.contains(column) {
            Err(QueryTranslationError::VirtualColumn {
                entity: self.entity.clone(),
                column: column.to_string(),
            })
        } else {
            Err(self.unknown(column))
        }
    }

    fn check_sortable(&self, column: &str) -> Result<(), QueryTranslationError> {
        if self.physical.contains(column) || self.virtuals.contains(column) {
            Ok(())
        } else {
            Err(self.unknown(column))
        }
    }

    fn unknown(&self, column: &str) -> QueryTranslationError {
        QueryTranslationError::UnknownColumn {
            entity: self.entity.clone(),
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryTranslator {
    default_page_size: usize,
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self { default_page_size: 25 }
    }
}

impl QueryTranslator {
    pub fn new(default_page_size: usize) -> Self {
        Self { default_page_size }
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    /// Search term across columns is a disjunction; filters and the raw
    /// predicate are ANDed with it. Filters on dotted (relation) columns are
    /// skipped.
    pub fn translate(
        &self,
        request: &QueryRequest,
        catalog: &ColumnCatalog,
    ) -> Result<QuerySpec, QueryTranslationError> {
        let page_size = request.page_size.unwrap_or(self.default_page_size);
        if page_size == 0 {
            return Err(QueryTranslationError::ZeroPageSize);
        }

        let mut clauses = Vec::new();

        if let Some(term) = request.search_term.as_deref().filter(|t| !t.is_empty()) {
            let mut terms = Vec::with_capacity(request.search_columns.len());
            for column in &request.search_columns {
                catalog.check_filterable(column)?;
                terms.push(Predicate::contains(column.clone(), JsonValue::String(term.to_string())));
            }
            clauses.extend(Predicate::any(terms));
        }

        for filter in &request.filters {
            if filter.column.contains('.') {
                debug!("Skipping relation filter on '{}'", filter.column);
                continue;
            }
            let op = Comparison::from_filter_operator(filter.operator.as_deref())?;
            catalog.check_filterable(&filter.column)?;
            clauses.push(Predicate::compare(filter.column.clone(), op, filter.value.clone()));
        }

        if let Some(raw) = &request.raw_predicate {
            let predicate = Predicate::from_json(raw)?;
            for column in predicate.columns() {
                catalog.check_filterable(column)?;
            }
            clauses.push(predicate);
        }

        let sort = match &request.sort_column {
            Some(column) => {
                catalog.check_sortable(column)?;
                // A blank direction means the default order.
                let direction = request
                    .sort_direction
                    .as_deref()
                    .map(str::trim)
                    .filter(|raw| !raw.is_empty())
                    .map(SortDirection::parse)
                    .transpose()?
                    .unwrap_or_default();
                Some(SortSpec {
                    column: column.clone(),
                    direction,
                })
            }
            None => None,
        };

        let offset = request
            .page
            .checked_mul(page_size)
            .ok_or(QueryTranslationError::PageOutOfRange {
                page: request.page,
                page_size,
            })?;

        let spec = QuerySpec {
            predicate: Predicate::all(clauses),
            includes: request.includes.clone(),
            limit: Some(page_size),
            offset,
            sort,
        };

        debug!(
            "Translated query on '{}': where {} limit {:?} offset {}",
            catalog.entity(),
            spec.predicate.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "true".into()),
            spec.limit,
            spec.offset
        );
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use serde_json::json;

    fn catalog() -> ColumnCatalog {
        ColumnCatalog::new(
            "task",
            ["id", "name", "status", "notes"].map(String::from),
            ["label".to_string()],
        )
    }

    #[test]
    fn search_and_filters_combine() {
        let request = QueryRequest::new()
            .search("abc", ["name"])
            .filter(Filter::new("status", "open"));
        let spec = QueryTranslator::default().translate(&request, &catalog()).unwrap();
        assert_eq!(
            spec.predicate.unwrap().to_string(),
            r#"(name contains "abc") AND (status contains "open")"#
        );
    }

    #[test]
    fn paging_uses_limit_and_offset() {
        let spec = QueryTranslator::default()
            .translate(&QueryRequest::new().page(2, 25), &catalog())
            .unwrap();
        assert_eq!(spec.limit, Some(25));
        assert_eq!(spec.offset, 50);
        assert!(spec.predicate.is_none());
    }

    #[test]
    fn default_page_size_applies() {
        let spec = QueryTranslator::new(10)
            .translate(&QueryRequest { page: 3, ..Default::default() }, &catalog())
            .unwrap();
        assert_eq!((spec.limit, spec.offset), (Some(10), 30));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = QueryTranslator::default()
            .translate(&QueryRequest::new().page(0, 0), &catalog())
            .unwrap_err();
        assert_eq!(err, QueryTranslationError::ZeroPageSize);
    }

    #[test]
    fn sort_direction_matches_prefix() {
        for raw in ["DESC", "desc", "Descending", "des"] {
            assert_eq!(SortDirection::parse(raw), Ok(SortDirection::Desc));
        }
        for raw in ["asc", "ASC", "ascending"] {
            assert_eq!(SortDirection::parse(raw), Ok(SortDirection::Asc));
        }
        assert_eq!(
            SortDirection::parse("sideways"),
            Err(QueryTranslationError::UnknownSortDirection("sideways".into()))
        );
    }

    #[test]
    fn unknown_sort_direction_fails_translation() {
        let request = QueryRequest::new().sort("name", "up");
        assert!(matches!(
            QueryTranslator::default().translate(&request, &catalog()),
            Err(QueryTranslationError::UnknownSortDirection(_))
        ));
    }

    #[test]
    fn blank_sort_direction_sorts_ascending() {
        for raw in ["", "  "] {
            let spec = QueryTranslator::default()
                .translate(&QueryRequest::new().sort("name", raw), &catalog())
                .unwrap();
            assert_eq!(spec.sort.unwrap().direction, SortDirection::Asc, "{:?}", raw);
        }
    }

    #[test]
    fn direction_without_sort_column_is_ignored() {
        let request = QueryRequest {
            sort_direction: Some("sideways".into()),
            ..Default::default()
        };
        let spec = QueryTranslator::default().translate(&request, &catalog()).unwrap();
        assert!(spec.sort.is_none());
    }

    #[test]
    fn huge_page_is_out_of_range() {
        let err = QueryTranslator::default()
            .translate(&QueryRequest::new().page(usize::MAX / 2, 25), &catalog())
            .unwrap_err();
        assert_eq!(
            err,
            QueryTranslationError::PageOutOfRange {
                page: usize::MAX / 2,
                page_size: 25
            }
        );
    }

    #[test]
    fn virtual_columns_sort_but_do_not_filter() {
        let translator = QueryTranslator::default();
        let sorted = translator
            .translate(&QueryRequest::new().sort("label", "desc"), &catalog())
            .unwrap();
        assert_eq!(sorted.sort.unwrap().direction, SortDirection::Desc);

        let filtered = translator.translate(&QueryRequest::new().filter(Filter::new("label", "x")), &catalog());
        assert!(matches!(filtered, Err(QueryTranslationError::VirtualColumn { .. })));
    }

    #[test]
    fn unknown_columns_and_operators_fail() {
        let translator = QueryTranslator::default();
        assert!(matches!(
            translator.translate(&QueryRequest::new().search("x", ["ghost"]), &catalog()),
            Err(QueryTranslationError::UnknownColumn { .. })
        ));
        assert!(matches!(
            translator.translate(
                &QueryRequest::new().filter(Filter::new("name", "x").with_operator("like")),
                &catalog()
            ),
            Err(QueryTranslationError::UnknownOperator(_))
        ));
        assert!(matches!(
            translator.translate(&QueryRequest::new().raw(json!({"ghost": 1})), &catalog()),
            Err(QueryTranslationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn dotted_filters_are_skipped() {
        let request = QueryRequest::new().filter(Filter::new("project.name", "x"));
        let spec = QueryTranslator::default().translate(&request, &catalog()).unwrap();
        assert!(spec.predicate.is_none());
    }

    #[test]
    fn raw_predicate_is_anded() {
        let request = QueryRequest::new()
            .filter(Filter::new("status", "open").with_operator("eq"))
            .raw(json!({"$or": [{"name": "a"}, {"name": "b"}]}));
        let spec = QueryTranslator::default().translate(&request, &catalog()).unwrap();
        assert_eq!(
            spec.predicate.unwrap().to_string(),
            r#"(status = "open") AND ((name = "a") OR (name = "b"))"#
        );
    }
}
