use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One column filter. Filters are ANDed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub column: String,
    pub value: JsonValue,
    /// `contains` when absent; also `eq`, `equals`, `startsWith`, `endsWith`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

impl Filter {
    pub fn new(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

/// A data request as sent by a client. Pages are zero-based.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub page: usize,
    pub page_size: Option<usize>,
    pub search_term: Option<String>,
    pub search_columns: Vec<String>,
    pub sort_column: Option<String>,
    pub sort_direction: Option<String>,
    pub filters: Vec<Filter>,
    /// Backend-native predicate document, ANDed with everything else
    pub raw_predicate: Option<JsonValue>,
    pub includes: Vec<String>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = Some(page_size);
        self
    }

    pub fn search<I, S>(mut self, term: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_term = Some(term.into());
        self.search_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort(mut self, column: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort_column = Some(column.into());
        self.sort_direction = Some(direction.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn raw(mut self, predicate: JsonValue) -> Self {
        self.raw_predicate = Some(predicate);
        self
    }

    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.includes.push(relation.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_client_payload() {
        let request: QueryRequest = serde_json::from_value(json!({
            "page": 2,
            "pageSize": 10,
            "searchTerm": "abc",
            "searchColumns": ["name"],
            "filters": [{"column": "status", "value": "open", "operator": "eq"}]
        }))
        .unwrap();
        assert_eq!(request.page, 2);
        assert_eq!(request.page_size, Some(10));
        assert_eq!(request.filters[0], Filter::new("status", "open").with_operator("eq"));
        assert!(request.includes.is_empty());
    }
}
