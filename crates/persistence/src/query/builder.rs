//! Elasticsearch Query DSL builder.
//!
//! Translates a [`SearchQuery`] into a bool query:
//!
//! - `filter`: one `term` per single-valued filter (AND, unscored)
//! - `should`: one `term` per value of a multi-valued filter, with
//!   `minimum_should_match: 1`
//! - `must`: the free-text `query_string`
//!
//! With no clauses at all the query is `match_all`.

use std::borrow::Cow;

use serde_json::{Map, Value, json};

use super::{SearchQuery, SortCriterion, Window};

/// Fields indexed with their native type instead of a `.keyword` sub-field.
pub const NON_KEYWORD_FIELDS: &[&str] = &["created", "time_inserted", "modified", "archived"];

/// Bucket cap of every terms aggregation.
pub const DEFAULT_AGGREGATION_SIZE: u64 = super::DEFAULT_LIMIT;

/// Returns the field to run exact matches, sorts and aggregations against.
///
/// Text fields carry a `.keyword` sub-field. Timestamps, flags, backend meta
/// fields (`_id`) and names already pointing at a sub-field are used as-is.
pub fn exact_field(field: &str) -> Cow<'_, str> {
    if field.starts_with('_')
        || field.ends_with(".keyword")
        || NON_KEYWORD_FIELDS.contains(&field)
    {
        Cow::Borrowed(field)
    } else {
        Cow::Owned(format!("{}.keyword", field))
    }
}

/// A complete Elasticsearch query body ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EsQuery {
    /// The complete query body.
    pub body: Value,
}

/// Builds Elasticsearch queries from [`SearchQuery`] values.
#[derive(Debug, Clone, Copy)]
pub struct EsQueryBuilder {
    aggregation_size: u64,
}

impl Default for EsQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EsQueryBuilder {
    /// Creates a builder with the default aggregation bucket cap.
    pub fn new() -> Self {
        Self {
            aggregation_size: DEFAULT_AGGREGATION_SIZE,
        }
    }

    /// Overrides the bucket cap of terms aggregations.
    pub fn with_aggregation_size(mut self, size: u64) -> Self {
        self.aggregation_size = size;
        self
    }

    /// Builds a `_search` body.
    pub fn build(&self, query: &SearchQuery) -> EsQuery {
        let mut body = Map::new();
        body.insert("query".to_string(), self.build_query(query));

        if let Window::Page { from, size } = query.window {
            body.insert("from".to_string(), json!(from));
            body.insert("size".to_string(), json!(size));
        }

        let sort = self.build_sort(&query.sort);
        if !sort.is_empty() {
            body.insert("sort".to_string(), Value::Array(sort));
        }

        let aggs = self.build_aggregations(&query.aggregations);
        if !aggs.is_empty() {
            body.insert("aggs".to_string(), Value::Object(aggs));
        }

        // Exact totals and per-hit concurrency tokens
        body.insert("track_total_hits".to_string(), json!(true));
        body.insert("seq_no_primary_term".to_string(), json!(true));

        EsQuery {
            body: Value::Object(body),
        }
    }

    /// Builds a `_count`-style body: the query only, no hits requested.
    pub fn build_count_query(&self, query: &SearchQuery) -> EsQuery {
        EsQuery {
            body: json!({
                "query": self.build_query(query),
                "size": 0,
                "track_total_hits": true,
            }),
        }
    }

    /// Builds a `_delete_by_query` body.
    ///
    /// Pagination, sort and aggregations are meaningless there and are dropped,
    /// so the request always covers every match.
    pub fn build_delete_query(&self, query: &SearchQuery) -> EsQuery {
        EsQuery {
            body: json!({ "query": self.build_query(query) }),
        }
    }

    /// Builds the `query` element.
    pub fn build_query(&self, query: &SearchQuery) -> Value {
        let mut filter_clauses: Vec<Value> = Vec::new();
        let mut or_groups: Vec<Vec<Value>> = Vec::new();

        for (field, values) in &query.filters {
            let field = exact_field(field);
            match values.as_slice() {
                [] => {}
                [value] => filter_clauses.push(term(&field, value)),
                many => or_groups.push(many.iter().map(|v| term(&field, v)).collect()),
            }
        }

        // A single OR group sits directly in `should`. Several groups must
        // each be satisfied, so they nest as their own bool inside `filter`.
        let mut should_clauses: Vec<Value> = Vec::new();
        if or_groups.len() == 1 {
            should_clauses = or_groups.pop().unwrap_or_default();
        } else {
            for group in or_groups {
                filter_clauses.push(json!({
                    "bool": { "should": group, "minimum_should_match": 1 }
                }));
            }
        }

        let must_clauses: Vec<Value> = query
            .text
            .iter()
            .map(|text| json!({ "query_string": { "query": text } }))
            .collect();

        if filter_clauses.is_empty() && should_clauses.is_empty() && must_clauses.is_empty() {
            return json!({ "match_all": {} });
        }

        let mut bool_query = Map::new();
        if !filter_clauses.is_empty() {
            bool_query.insert("filter".to_string(), Value::Array(filter_clauses));
        }
        if !should_clauses.is_empty() {
            bool_query.insert("should".to_string(), Value::Array(should_clauses));
            bool_query.insert("minimum_should_match".to_string(), json!(1));
        }
        if !must_clauses.is_empty() {
            bool_query.insert("must".to_string(), Value::Array(must_clauses));
        }

        json!({ "bool": bool_query })
    }

    /// Builds the `sort` array.
    pub fn build_sort(&self, sort: &[SortCriterion]) -> Vec<Value> {
        sort.iter()
            .map(|criterion| {
                let order = if criterion.descending { "desc" } else { "asc" };
                json!({ exact_field(&criterion.field): { "order": order } })
            })
            .collect()
    }

    /// Builds the `aggs` object: one terms aggregation per field, keyed by field.
    pub fn build_aggregations(&self, fields: &[String]) -> Map<String, Value> {
        fields
            .iter()
            .map(|field| {
                (
                    field.clone(),
                    json!({
                        "terms": {
                            "field": exact_field(field),
                            "size": self.aggregation_size,
                        }
                    }),
                )
            })
            .collect()
    }
}

fn term(field: &str, value: &str) -> Value {
    json!({ "term": { field: value } })
}
