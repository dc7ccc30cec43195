//! Query-string style parameters to [`SearchQuery`].

use super::{DEFAULT_LIMIT, SearchQuery, SortCriterion, Window};

/// Object identifiers stored under `meta.` on objects and annotations.
const META_FIELDS: &[&str] = &[
    "study_instance_uid",
    "series_instance_uid",
    "sop_instance_uid",
    "masked_study_instance_uid",
    "masked_series_instance_uid",
    "masked_sop_instance_uid",
];

/// Parses flat key/value request parameters.
///
/// Reserved keys:
///
/// | key       | meaning                                    |
/// |-----------|--------------------------------------------|
/// | `_limit`  | page size, default 100                     |
/// | `_offset` | page start, default 0                      |
/// | `_sort`   | comma list, `-` prefix for descending      |
/// | `_search` | free text                                  |
/// | `_agg`    | terms aggregation field, may repeat        |
///
/// Any other key is a filter; repeating a key adds alternatives.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParams;

impl QueryParams {
    /// Page size parameter.
    pub const LIMIT: &'static str = "_limit";
    /// Page start parameter.
    pub const OFFSET: &'static str = "_offset";
    /// Sort parameter.
    pub const SORT: &'static str = "_sort";
    /// Free-text parameter.
    pub const SEARCH: &'static str = "_search";
    /// Aggregation parameter.
    pub const AGGREGATION: &'static str = "_agg";

    /// Builds a query from parameter pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> SearchQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = SearchQuery::new();
        let mut from = 0;
        let mut size = DEFAULT_LIMIT;

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                Self::LIMIT => size = value.parse().unwrap_or(DEFAULT_LIMIT),
                Self::OFFSET => from = value.parse().unwrap_or(0),
                Self::SORT => query.sort = SortCriterion::parse_list(value),
                Self::SEARCH => query = query.text(value),
                Self::AGGREGATION => {
                    if !value.is_empty() {
                        query = query.aggregate(value);
                    }
                }
                field if META_FIELDS.contains(&field) => {
                    query = query.filter(format!("meta.{}", field), value);
                }
                field => query = query.filter(field, value),
            }
        }

        query.window = Window::Page { from, size };
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys() {
        let query = QueryParams::from_pairs([
            ("_limit", "25"),
            ("_offset", "50"),
            ("_sort", "-created"),
            ("_search", "code:TSK-1*"),
            ("_agg", "status"),
            ("_agg", "type"),
        ]);
        assert_eq!(query.window, Window::Page { from: 50, size: 25 });
        assert_eq!(query.sort.len(), 1);
        assert!(query.sort[0].descending);
        assert_eq!(query.text.as_deref(), Some("code:TSK-1*"));
        assert_eq!(query.aggregations, vec!["status", "type"]);
        assert!(query.filters.is_empty());
    }

    #[test]
    fn test_bad_numbers_fall_back_to_defaults() {
        let query = QueryParams::from_pairs([("_limit", "lots"), ("_offset", "-3")]);
        assert_eq!(query.window, Window::Page { from: 0, size: 100 });
    }

    #[test]
    fn test_filters_and_meta_prefix() {
        let query = QueryParams::from_pairs([
            ("status", "NEW"),
            ("status", "DOING"),
            ("study_instance_uid", "1.2.3"),
        ]);
        assert_eq!(query.filters["status"], vec!["NEW", "DOING"]);
        assert_eq!(query.filters["meta.study_instance_uid"], vec!["1.2.3"]);
    }
}
