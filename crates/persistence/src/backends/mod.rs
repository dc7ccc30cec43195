//! Search backend implementations.
//!
//! Every document store talks to its backend through [`SearchBackend`], a thin
//! seam over the Elasticsearch REST verbs the stores need. Requests carry
//! query bodies built by [`EsQueryBuilder`](crate::query::EsQueryBuilder) and
//! responses come back as the typed shapes in this module.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Elasticsearch | `elasticsearch` | The production backend |
//! | In-memory | always on | Evaluates the emitted DSL subset, for tests and local runs |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "elasticsearch")]
//! use annolab_persistence::backends::elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
//!
//! # #[cfg(feature = "elasticsearch")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = ElasticsearchBackend::new(ElasticsearchConfig::default())?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, StorageResult};

/// Expected version of a document for a guarded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGuard {
    /// Sequence number observed at read time.
    pub seq_no: i64,
    /// Primary term observed at read time.
    pub primary_term: i64,
}

/// Result of a single-document write.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteOutcome {
    /// `created`, `updated` or `noop`.
    pub result: String,
    /// Sequence number after the write.
    #[serde(rename = "_seq_no", default)]
    pub seq_no: i64,
    /// Primary term after the write.
    #[serde(rename = "_primary_term", default)]
    pub primary_term: i64,
}

/// One hit of a search response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    /// The physical index holding the document.
    #[serde(rename = "_index")]
    pub index: String,
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Sequence number, present when requested.
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<i64>,
    /// Primary term, present when requested.
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<i64>,
    /// The stored document.
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl SearchHit {
    /// Returns the concurrency token of this hit, if the backend sent one.
    pub fn version_guard(&self) -> Option<VersionGuard> {
        Some(VersionGuard {
            seq_no: self.seq_no?,
            primary_term: self.primary_term?,
        })
    }
}

/// One bucket of a terms aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket key. Strings for keyword fields, numbers for dates and flags.
    pub key: Value,
    /// Number of matching documents.
    pub doc_count: u64,
}

impl Bucket {
    /// Returns the key rendered as a string.
    pub fn key_string(&self) -> String {
        match &self.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Result of a terms aggregation: `{buckets: [{key, doc_count}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermsAggregation {
    /// Buckets in descending document count.
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

impl TermsAggregation {
    /// Returns the document count of the bucket with the given key, 0 if absent.
    pub fn count_of(&self, key: &str) -> u64 {
        self.buckets
            .iter()
            .find(|b| b.key_string() == key)
            .map(|b| b.doc_count)
            .unwrap_or(0)
    }
}

/// Aggregation results keyed by the requested field.
pub type Aggregations = BTreeMap<String, TermsAggregation>;

/// A parsed `_search` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Total number of matches, independent of pagination.
    pub total: u64,
    /// The requested page of hits.
    pub hits: Vec<SearchHit>,
    /// Aggregation results.
    pub aggregations: Aggregations,
}

#[derive(Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
    #[serde(default)]
    aggregations: Aggregations,
}

#[derive(Deserialize)]
struct RawHits {
    #[serde(default)]
    total: Option<RawTotal>,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct RawTotal {
    value: u64,
}

impl SearchResponse {
    /// Parses the JSON body of a `_search` response.
    pub fn from_json(body: Value) -> StorageResult<Self> {
        let raw: RawSearchResponse = serde_json::from_value(body)?;
        let total = raw
            .hits
            .total
            .map(|t| t.value)
            .unwrap_or(raw.hits.hits.len() as u64);
        Ok(Self {
            total,
            hits: raw.hits.hits,
            aggregations: raw.aggregations,
        })
    }
}

/// Error body attached to a failed bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemError {
    /// Backend error type, e.g. `mapper_parsing_exception`.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Human-readable reason.
    #[serde(default)]
    pub reason: String,
}

/// Outcome of one item of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkItem {
    /// Target index.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// Document id.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// HTTP-like status of the item.
    pub status: u16,
    /// Error details for failed items.
    #[serde(default)]
    pub error: Option<ItemError>,
}

impl BulkItem {
    /// Items with status up to 201 were indexed.
    pub fn is_success(&self) -> bool {
        self.status <= 201
    }
}

/// A parsed `_bulk` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Server-side processing time in milliseconds.
    pub took: u64,
    /// True if any item failed.
    pub errors: bool,
    /// One entry per action line, in request order.
    pub items: Vec<BulkItem>,
}

#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

impl BulkResponse {
    /// Parses the JSON body of a `_bulk` response.
    ///
    /// Each item is keyed by its action (`index`, `create`, ...); the key is dropped.
    pub fn from_json(body: Value) -> StorageResult<Self> {
        let raw: RawBulkResponse = serde_json::from_value(body)?;
        Ok(Self {
            took: raw.took,
            errors: raw.errors,
            items: raw
                .items
                .into_iter()
                .filter_map(|item| item.into_values().next())
                .collect(),
        })
    }
}

/// An index template to install at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTemplate {
    /// Template name.
    pub name: String,
    /// Index pattern the template applies to.
    pub pattern: String,
}

/// The operations a document store needs from a search backend.
///
/// Writes are issued with synchronous visibility (`refresh=true`): a document
/// written by one call is visible to the next search.
#[async_trait]
pub trait SearchBackend: Send + Sync + Debug {
    /// Returns a short backend name for logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Checks that the backend is reachable and healthy.
    async fn health_check(&self) -> StorageResult<()>;

    /// Installs index templates. Idempotent.
    async fn initialize(&self, templates: &[IndexTemplate]) -> StorageResult<()>;

    /// Creates a document. Fails if a document with the same id exists in `index`.
    async fn create(&self, index: &str, id: &str, document: Value) -> StorageResult<WriteOutcome>;

    /// Merges `partial` into an existing document.
    ///
    /// With a guard, the write is rejected with status 409 unless the
    /// document's sequence number and primary term still match.
    async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Value,
        guard: Option<VersionGuard>,
    ) -> StorageResult<WriteOutcome>;

    /// Runs a search over an index name or pattern.
    async fn search(&self, index_pattern: &str, body: Value) -> StorageResult<SearchResponse>;

    /// Deletes every match of the query body, returning the number deleted.
    async fn delete_by_query(&self, index_pattern: &str, body: Value) -> StorageResult<u64>;

    /// Sends NDJSON bulk lines (action, document, action, document, ...).
    async fn bulk(&self, lines: Vec<String>) -> StorageResult<BulkResponse>;
}

/// Converts an error response into [`BackendError::Rejected`].
///
/// The backend's body is `{"error": {"type", "reason"}, "status"}`; some
/// endpoints send a plain string as `error` instead.
pub(crate) fn rejection(backend_name: &str, status: u16, body: &Value) -> BackendError {
    let (error_type, reason) = match body.get("error") {
        Some(Value::Object(error)) => (
            error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            error
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        Some(Value::String(reason)) => ("unknown".to_string(), reason.clone()),
        _ => ("unknown".to_string(), body.to_string()),
    };
    BackendError::Rejected {
        backend_name: backend_name.to_string(),
        status,
        error_type,
        reason,
    }
}
