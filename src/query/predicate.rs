//! Backend-agnostic row predicates.

use crate::error::QueryTranslationError;
use crate::storage::{fold, Row};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
}

impl Comparison {
    /// Parses a filter operator token. `None` means the default, `contains`.
    pub fn from_filter_operator(token: Option<&str>) -> Result<Self, QueryTranslationError> {
        match token {
            None | Some("contains") => Ok(Self::Contains),
            Some("eq") | Some("equals") => Ok(Self::Eq),
            Some("startsWith") => Ok(Self::StartsWith),
            Some("endsWith") => Ok(Self::EndsWith),
            Some(other) => Err(QueryTranslationError::UnknownOperator(other.to_string())),
        }
    }

    fn from_raw_operator(token: &str) -> Result<Self, QueryTranslationError> {
        let op = match token {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$contains" => Self::Contains,
            "$startsWith" => Self::StartsWith,
            "$endsWith" => Self::EndsWith,
            "$in" => Self::In,
            other => return Err(QueryTranslationError::UnknownOperator(other.to_string())),
        };
        Ok(op)
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Contains => "contains",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: Comparison,
        value: JsonValue,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: Comparison, value: JsonValue) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn contains(column: impl Into<String>, value: JsonValue) -> Self {
        Self::compare(column, Comparison::Contains, value)
    }

    /// Conjunction of `parts`; a single part is returned as is.
    pub fn all(mut parts: Vec<Predicate>) -> Option<Predicate> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::And(parts)),
        }
    }

    /// Disjunction of `parts`; a single part is returned as is.
    pub fn any(mut parts: Vec<Predicate>) -> Option<Predicate> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::Or(parts)),
        }
    }

    /// Every column the predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, .. } => out.push(column),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
            Self::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Evaluates the predicate against a row. Text compares case-insensitively.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Compare { column, op, value } => {
                let stored = row.get(column).unwrap_or(&JsonValue::Null);
                compare(stored, *op, value)
            }
            Self::And(parts) => parts.iter().all(|p| p.matches(row)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(row)),
            Self::Not(inner) => !inner.matches(row),
        }
    }

    /// Parses a raw predicate document.
    ///
    /// ```text
    /// {"status": "open"}                          equality
    /// {"estimate": {"$gte": 3, "$lt": 8}}         operators, ANDed
    /// {"$or": [{...}, {...}]}, {"$and": [...]}, {"$not": {...}}
    /// ```
    pub fn from_json(raw: &JsonValue) -> Result<Predicate, QueryTranslationError> {
        let map = raw
            .as_object()
            .ok_or_else(|| QueryTranslationError::InvalidPredicate("predicate must be an object".into()))?;

        let mut parts = Vec::new();
        for (key, value) in map {
            match key.as_str() {
                "$and" | "$or" => {
                    let items = value.as_array().ok_or_else(|| {
                        QueryTranslationError::InvalidPredicate(format!("{} expects an array", key))
                    })?;
                    let nested = items.iter().map(Self::from_json).collect::<Result<Vec<_>, _>>()?;
                    let combined = if key == "$and" { Self::all(nested) } else { Self::any(nested) };
                    parts.extend(combined);
                }
                "$not" => parts.push(Self::Not(Box::new(Self::from_json(value)?))),
                op if op.starts_with('$') => {
                    return Err(QueryTranslationError::UnknownOperator(op.to_string()));
                }
                column => match value {
                    JsonValue::Object(ops) => {
                        for (op, operand) in ops {
                            let op = Comparison::from_raw_operator(op)?;
                            if op == Comparison::In && !operand.is_array() {
                                return Err(QueryTranslationError::InvalidPredicate(format!(
                                    "$in on '{}' expects an array",
                                    column
                                )));
                            }
                            parts.push(Self::compare(column, op, operand.clone()));
                        }
                    }
                    scalar => parts.push(Self::compare(column, Comparison::Eq, scalar.clone())),
                },
            }
        }

        Self::all(parts).ok_or_else(|| QueryTranslationError::InvalidPredicate("predicate is empty".into()))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { column, op, value } => write!(f, "{} {} {}", column, op.keyword(), value),
            Self::And(parts) => write_joined(f, parts, " AND "),
            Self::Or(parts) => write_joined(f, parts, " OR "),
            Self::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({})", part)?;
    }
    Ok(())
}

/// Text form used by substring operators.
fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(fold(s)),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Total order over JSON scalars: null < bool < number < string (folded).
/// Objects and arrays sort last, by their serialized form.
pub fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) | JsonValue::Object(_) => 4,
        }
    }
    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(x), JsonValue::String(y)) => fold(x).cmp(&fold(y)),
        _ if rank(a) == rank(b) && rank(a) == 4 => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn equal(stored: &JsonValue, expected: &JsonValue) -> bool {
    match (stored, expected) {
        (JsonValue::String(a), JsonValue::String(b)) => fold(a) == fold(b),
        (JsonValue::Number(_), JsonValue::Number(_)) => compare_values(stored, expected) == Ordering::Equal,
        _ => stored == expected,
    }
}

fn compare(stored: &JsonValue, op: Comparison, expected: &JsonValue) -> bool {
    match op {
        Comparison::Eq => equal(stored, expected),
        Comparison::Ne => !equal(stored, expected),
        Comparison::Contains | Comparison::StartsWith | Comparison::EndsWith => {
            let (Some(haystack), Some(needle)) = (as_text(stored), as_text(expected)) else {
                return false;
            };
            match op {
                Comparison::Contains => haystack.contains(&needle),
                Comparison::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            }
        }
        Comparison::In => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equal(stored, item))),
        Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
            let comparable = matches!(
                (stored, expected),
                (JsonValue::Number(_), JsonValue::Number(_)) | (JsonValue::String(_), JsonValue::String(_))
            );
            if !comparable {
                return false;
            }
            let ordering = compare_values(stored, expected);
            match op {
                Comparison::Gt => ordering == Ordering::Greater,
                Comparison::Gte => ordering != Ordering::Less,
                Comparison::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
    }
}
