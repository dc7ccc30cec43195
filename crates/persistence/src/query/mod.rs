//! Typed search requests and their translation into the backend query DSL.
//!
//! A [`SearchQuery`] is what callers build; [`EsQueryBuilder`] turns it into
//! the JSON body of a `_search` or `_delete_by_query` request.
//!
//! ```
//! use annolab_persistence::query::{EsQueryBuilder, SearchQuery};
//!
//! let query = SearchQuery::new()
//!     .filter("project_id", "p-1")
//!     .filter_any("status", ["NEW", "DOING"])
//!     .sort_by("-created")
//!     .page(0, 20);
//!
//! let body = EsQueryBuilder::new().build(&query).body;
//! assert_eq!(body["size"], 20);
//! ```

mod builder;
mod params;

use std::collections::BTreeMap;
use std::fmt;

pub use builder::{
    DEFAULT_AGGREGATION_SIZE, EsQuery, EsQueryBuilder, NON_KEYWORD_FIELDS, exact_field,
};
pub use params::QueryParams;

/// Default page size, also the bucket cap of terms aggregations.
pub const DEFAULT_LIMIT: u64 = 100;

/// Which slice of the matching documents to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// `from`/`size` pagination.
    #[allow(missing_docs)]
    Page { from: u64, size: u64 },
    /// Every match, no pagination. Used by delete-by-query.
    Unbounded,
}

impl Default for Window {
    fn default() -> Self {
        Window::Page {
            from: 0,
            size: DEFAULT_LIMIT,
        }
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCriterion {
    /// Logical field name, without the `.keyword` suffix.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl SortCriterion {
    /// Parses a comma-separated list where a leading `-` means descending.
    ///
    /// Empty segments are ignored.
    pub fn parse_list(raw: &str) -> Vec<SortCriterion> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "-")
            .map(|s| match s.strip_prefix('-') {
                Some(field) => SortCriterion {
                    field: field.to_string(),
                    descending: true,
                },
                None => SortCriterion {
                    field: s.to_string(),
                    descending: false,
                },
            })
            .collect()
    }
}

/// A structured search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Field to accepted values. One value is an exact match, several are an OR group.
    pub filters: BTreeMap<String, Vec<String>>,
    /// Free text in query-string syntax, ANDed with the filters.
    pub text: Option<String>,
    /// Pagination window.
    pub window: Window,
    /// Sort criteria, applied in order.
    pub sort: Vec<SortCriterion>,
    /// Fields to build terms aggregations over.
    pub aggregations: Vec<String>,
}

impl SearchQuery {
    /// Creates a match-all query with the default window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching a single document id.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().filter("_id", id)
    }

    /// Adds an exact-match value for `field`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters
            .entry(field.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Adds several accepted values for `field`.
    pub fn filter_any<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Sets the free-text clause. Blank text clears it.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    /// Replaces the sort with a parsed `a,-b` list.
    pub fn sort_by(mut self, raw: &str) -> Self {
        self.sort = SortCriterion::parse_list(raw);
        self
    }

    /// Adds a terms aggregation over `field`.
    pub fn aggregate(mut self, field: impl Into<String>) -> Self {
        self.aggregations.push(field.into());
        self
    }

    /// Sets `from`/`size` pagination.
    pub fn page(mut self, from: u64, size: u64) -> Self {
        self.window = Window::Page { from, size };
        self
    }

    /// Removes pagination entirely.
    pub fn unbounded(mut self) -> Self {
        self.window = Window::Unbounded;
        self
    }

    /// Returns true if the query has neither filters nor text.
    pub fn matches_all(&self) -> bool {
        self.text.is_none() && self.filters.values().all(Vec::is_empty)
    }
}

impl fmt::Display for SearchQuery {
    /// Renders the criteria for log lines and not-found messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .filters
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(field, values)| format!("{}={}", field, values.join("|")))
            .collect();
        if let Some(text) = &self.text {
            parts.push(format!("q={}", text));
        }
        if parts.is_empty() {
            return f.write_str("*");
        }
        f.write_str(&parts.join(" "))
    }
}
