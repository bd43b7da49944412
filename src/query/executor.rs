//! Applies a [`QuerySpec`] to rows fetched from a backend.

use super::predicate::compare_values;
use super::translator::{QuerySpec, SortDirection};
use crate::error::VirtualFieldError;
use crate::storage::Row;
use crate::virtual_field::{project, VirtualColumn};
use serde_json::Value as JsonValue;

/// One page of rows plus the match count before pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub total_count: usize,
}

/// Number of rows matching `spec.predicate`.
pub fn count(rows: &[Row], spec: &QuerySpec) -> usize {
    match &spec.predicate {
        Some(predicate) => rows.iter().filter(|row| predicate.matches(row)).count(),
        None => rows.len(),
    }
}

/// Filters, sorts and pages `rows`, projecting `virtuals` into the returned
/// rows. Sorting is stable, so rows with equal keys keep their scan order.
pub fn execute(rows: Vec<Row>, spec: &QuerySpec, virtuals: &[VirtualColumn]) -> Result<QueryOutcome, VirtualFieldError> {
    let mut matched: Vec<Row> = match &spec.predicate {
        Some(predicate) => rows.into_iter().filter(|row| predicate.matches(row)).collect(),
        None => rows,
    };
    let total_count = matched.len();

    // A virtual sort key has to exist before sorting.
    let sort_on_virtual = spec
        .sort
        .as_ref()
        .is_some_and(|sort| virtuals.iter().any(|v| v.name == sort.column));
    if sort_on_virtual {
        for row in matched.iter_mut() {
            project(virtuals, row)?;
        }
    }

    if let Some(sort) = &spec.sort {
        let key = |row: &Row| row.get(&sort.column).cloned().unwrap_or(JsonValue::Null);
        match sort.direction {
            SortDirection::Asc => matched.sort_by(|a, b| compare_values(&key(a), &key(b))),
            SortDirection::Desc => matched.sort_by(|a, b| compare_values(&key(b), &key(a))),
        }
    }

    let page: Vec<Row> = matched
        .into_iter()
        .skip(spec.offset)
        .take(spec.limit.unwrap_or(usize::MAX))
        .collect();

    let mut rows = page;
    if !sort_on_virtual {
        for row in rows.iter_mut() {
            project(virtuals, row)?;
        }
    }

    Ok(QueryOutcome { rows, total_count })
}
