//! Generic document store.
//!
//! A [`DocumentStore`] binds one entity type to one collection: it owns the
//! collection's [`IndexResolver`], serializes documents and turns
//! [`SearchQuery`] values into backend requests. Every entity of the system is
//! served by an instantiation of this one type.
//!
//! # Shard placement
//!
//! Documents are created in the shard computed from their discriminator and
//! creation time. Updates never recompute the shard: they look the document up
//! and write to the index it was found in.
//!
//! # Concurrency
//!
//! [`DocumentStore::update`] is a guarded read-modify-write. The read returns
//! the document's sequence number and primary term, and the write is rejected
//! if another writer got there first. The rejection surfaces as
//! [`ConcurrencyError::VersionConflict`]; [`DocumentStore::update_with_retry`]
//! re-reads and tries again.
//!
//! # Scans
//!
//! [`DocumentStore::scan`] pages with `from`/`size`. It is not a snapshot:
//! documents written while a scan runs may be seen, missed or, when sort
//! order shifts, seen twice.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::{Aggregations, SearchBackend, SearchHit, VersionGuard, WriteOutcome};
use crate::bulk::{BulkEntry, BulkFailure, BulkReport, BulkWriter};
use crate::cancel::CancelSignal;
use crate::error::{
    BackendError, ConcurrencyError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::index::IndexResolver;
use crate::query::{EsQueryBuilder, SearchQuery};

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// An entity stored in its own collection.
pub trait Document: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Collection name used in errors and logs.
    const COLLECTION: &'static str;

    /// Partial update accepted by [`DocumentStore::update`].
    type Patch: Patch;

    /// Stable, externally generated id.
    fn id(&self) -> &str;

    /// Creation time in epoch milliseconds, used for shard placement.
    fn created_ms(&self) -> i64;

    /// Type discriminator for collections split by type.
    fn discriminator(&self) -> Option<&str> {
        None
    }

    /// Checks structural rules before the document is written.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A typed partial update. Unset fields are left untouched.
pub trait Patch: Serialize + Debug + Send + Sync {
    /// Checks the patch before it is merged.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// True when the patch sets no field.
    fn is_empty(&self) -> bool {
        matches!(serde_json::to_value(self), Ok(Value::Object(map)) if map.is_empty())
    }
}

/// One page of a list request.
#[derive(Debug, Clone)]
pub struct SearchPage<D> {
    /// Decoded documents of the page.
    pub documents: Vec<D>,
    /// Total number of matches.
    pub total: u64,
    /// Aggregations requested by the query.
    pub aggregations: Aggregations,
}

/// A document together with where it lives and its concurrency token.
#[derive(Debug, Clone)]
pub struct Versioned<D> {
    /// The decoded document.
    pub document: D,
    /// The physical index holding it.
    pub index: String,
    /// Sequence number and primary term at read time.
    pub guard: Option<VersionGuard>,
}

/// CRUD, scan and bulk access to one collection.
pub struct DocumentStore<D> {
    backend: Arc<dyn SearchBackend>,
    resolver: IndexResolver,
    builder: EsQueryBuilder,
    writer: BulkWriter,
    _document: PhantomData<fn() -> D>,
}

impl<D> Clone for DocumentStore<D> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            resolver: self.resolver.clone(),
            builder: self.builder.clone(),
            writer: self.writer.clone(),
            _document: PhantomData,
        }
    }
}

impl<D> Debug for DocumentStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("resolver", &self.resolver)
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl<D: Document> DocumentStore<D> {
    /// Creates a store over `backend` for the collection described by `resolver`.
    pub fn new(backend: Arc<dyn SearchBackend>, resolver: IndexResolver) -> Self {
        Self {
            writer: BulkWriter::new(Arc::clone(&backend)),
            backend,
            resolver,
            builder: EsQueryBuilder::new(),
            _document: PhantomData,
        }
    }

    /// Sets the bulk batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.writer = self.writer.with_batch_size(batch_size);
        self
    }

    /// Returns the index resolver of this collection.
    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Physical index a new document is written to.
    pub fn shard_of(&self, document: &D) -> String {
        self.resolver
            .shard_for(document.discriminator(), document.created_ms())
    }

    /// Creates a document. Fails if the id already exists in its shard.
    pub async fn create(&self, document: &D) -> StorageResult<()> {
        document
            .validate()
            .map_err(|message| invalid_document::<D>(message))?;

        let index = self.shard_of(document);
        let body = serde_json::to_value(document)?;

        let outcome = self
            .backend
            .create(&index, document.id(), body)
            .await
            .map_err(|e| match e {
                StorageError::Backend(BackendError::Rejected { reason, .. }) => {
                    write_rejected::<D>(document.id(), reason)
                }
                other => other,
            })?;

        if outcome.result != "created" {
            return Err(write_rejected::<D>(
                document.id(),
                format!("unexpected result {}", outcome.result),
            ));
        }

        debug!(collection = D::COLLECTION, index = %index, id = %document.id(), "Created document");
        Ok(())
    }

    /// Returns the first match of the query, or `NotFound`.
    pub async fn get(&self, query: &SearchQuery) -> StorageResult<D> {
        self.get_versioned(query).await.map(|v| v.document)
    }

    /// Returns the document with the given id, or `NotFound`.
    pub async fn get_by_id(&self, id: &str) -> StorageResult<D> {
        self.get(&SearchQuery::by_id(id)).await
    }

    /// Like [`get`](Self::get) but maps `NotFound` to `None`.
    pub async fn find(&self, query: &SearchQuery) -> StorageResult<Option<D>> {
        match self.get(query).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the first match with its index and concurrency token.
    pub async fn get_versioned(&self, query: &SearchQuery) -> StorageResult<Versioned<D>> {
        let first_only = query.clone().page(0, 1);
        let body = self.builder.build(&first_only).body;
        let response = self.backend.search(&self.resolver.wildcard(), body).await?;

        response
            .hits
            .into_iter()
            .find_map(|hit| {
                let guard = hit.version_guard();
                let index = hit.index.clone();
                decode::<D>(hit).map(|document| Versioned {
                    document,
                    index,
                    guard,
                })
            })
            .ok_or_else(|| StorageError::not_found(D::COLLECTION, query.to_string()))
    }

    /// Returns one page of matches.
    pub async fn list(&self, query: &SearchQuery) -> StorageResult<SearchPage<D>> {
        self.search_page(query).await.map(|(page, _)| page)
    }

    /// Number of matches.
    pub async fn count(&self, query: &SearchQuery) -> StorageResult<u64> {
        let body = self.builder.build_count_query(query).body;
        let response = self.backend.search(&self.resolver.wildcard(), body).await?;
        Ok(response.total)
    }

    async fn search_page(&self, query: &SearchQuery) -> StorageResult<(SearchPage<D>, usize)> {
        let body = self.builder.build(query).body;
        debug!(collection = D::COLLECTION, query = %query, "Searching");

        let response = self.backend.search(&self.resolver.wildcard(), body).await?;
        let raw_hits = response.hits.len();
        let documents = response.hits.into_iter().filter_map(decode::<D>).collect();

        Ok((
            SearchPage {
                documents,
                total: response.total,
                aggregations: response.aggregations,
            },
            raw_hits,
        ))
    }

    /// Visits every match page by page.
    ///
    /// Stops when a page comes back short, when `visit` breaks, or with
    /// `Cancelled` when the signal fires. Returns the number of documents
    /// visited.
    pub async fn scan<F>(
        &self,
        query: &SearchQuery,
        page_size: u64,
        cancel: &CancelSignal,
        mut visit: F,
    ) -> StorageResult<u64>
    where
        F: FnMut(&[D]) -> ControlFlow<()>,
    {
        if page_size == 0 {
            return Err(StorageError::invalid_request("scan page size must be positive"));
        }

        let mut from = 0;
        let mut visited = 0;
        loop {
            cancel.check("scan")?;

            let (page, raw_hits) = self
                .search_page(&query.clone().page(from, page_size))
                .await?;
            visited += page.documents.len() as u64;

            if visit(&page.documents).is_break() || (raw_hits as u64) < page_size {
                return Ok(visited);
            }
            from += page_size;
        }
    }

    /// Collects every match with [`scan`](Self::scan).
    pub async fn scan_all(
        &self,
        query: &SearchQuery,
        page_size: u64,
        cancel: &CancelSignal,
    ) -> StorageResult<Vec<D>> {
        let mut out = Vec::new();
        self.scan(query, page_size, cancel, |page| {
            out.extend_from_slice(page);
            ControlFlow::Continue(())
        })
        .await?;
        Ok(out)
    }

    /// Merges a patch into the document with the given id.
    ///
    /// Stamps `modified`. Fails with `NotFound` (no write sent) when the id
    /// does not exist, and with `VersionConflict` when the document changed
    /// between the read and the write.
    pub async fn update(&self, id: &str, patch: &D::Patch) -> StorageResult<WriteOutcome> {
        patch
            .validate()
            .map_err(|message| invalid_patch::<D>(message))?;
        if patch.is_empty() {
            return Err(invalid_patch::<D>("patch sets no field"));
        }

        let current = self.get_versioned(&SearchQuery::by_id(id)).await?;

        let mut body = serde_json::to_value(patch)?;
        if let Value::Object(map) = &mut body {
            map.insert("modified".to_string(), Value::from(now_ms()));
        }

        let outcome = self
            .backend
            .update(&current.index, id, body, current.guard)
            .await
            .map_err(|e| match e {
                StorageError::Backend(BackendError::Rejected { status: 409, .. }) => {
                    StorageError::Concurrency(ConcurrencyError::VersionConflict {
                        collection: D::COLLECTION.to_string(),
                        id: id.to_string(),
                        expected_seq_no: current.guard.map(|g| g.seq_no).unwrap_or_default(),
                    })
                }
                StorageError::Backend(BackendError::Rejected { status: 404, .. }) => {
                    StorageError::not_found(D::COLLECTION, format!("_id={}", id))
                }
                other => other,
            })?;

        debug!(collection = D::COLLECTION, index = %current.index, id = %id, "Updated document");
        Ok(outcome)
    }

    /// [`update`](Self::update), retrying version conflicts up to `attempts` times.
    pub async fn update_with_retry(
        &self,
        id: &str,
        patch: &D::Patch,
        attempts: u32,
    ) -> StorageResult<WriteOutcome> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.update(id, patch).await {
                Err(e) if e.is_conflict() => {
                    warn!(
                        collection = D::COLLECTION,
                        id = %id,
                        attempt,
                        "Version conflict on update, retrying"
                    );
                }
                result => return result,
            }
        }

        Err(StorageError::Concurrency(
            ConcurrencyError::RetriesExhausted {
                collection: D::COLLECTION.to_string(),
                id: id.to_string(),
                attempts,
            },
        ))
    }

    /// Deletes every match across all shards. Returns the number deleted.
    pub async fn delete(&self, query: &SearchQuery) -> StorageResult<u64> {
        let body = self.builder.build_delete_query(&query.clone().unbounded()).body;
        let deleted = self
            .backend
            .delete_by_query(&self.resolver.wildcard(), body)
            .await?;
        debug!(collection = D::COLLECTION, query = %query, deleted, "Deleted by query");
        Ok(deleted)
    }

    /// Writes documents in bulk, each to its own creation shard.
    ///
    /// Documents that fail validation or serialization are counted as errored
    /// without being sent.
    pub async fn bulk_write(&self, documents: &[D], cancel: &CancelSignal) -> BulkReport {
        let mut rejected = Vec::new();
        let mut entries = Vec::with_capacity(documents.len());

        for document in documents {
            let index = self.shard_of(document);
            let prepared = document
                .validate()
                .and_then(|()| serde_json::to_value(document).map_err(|e| e.to_string()));
            match prepared {
                Ok(body) => entries.push(BulkEntry {
                    index,
                    id: document.id().to_string(),
                    document: body,
                }),
                Err(reason) => rejected.push(BulkFailure {
                    index,
                    id: document.id().to_string(),
                    status: None,
                    error_type: "invalid_document".to_string(),
                    reason,
                }),
            }
        }

        let mut report = self.writer.write(entries, cancel).await;
        report.errored += rejected.len();
        report.failures.extend(rejected);
        report
    }
}

fn decode<D: Document>(hit: SearchHit) -> Option<D> {
    match serde_json::from_value(hit.source) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!(
                collection = D::COLLECTION,
                index = %hit.index,
                id = %hit.id,
                error = %e,
                "Skipping undecodable hit"
            );
            None
        }
    }
}

fn write_rejected<D: Document>(id: &str, message: impl Into<String>) -> StorageError {
    StorageError::Resource(ResourceError::WriteRejected {
        collection: D::COLLECTION.to_string(),
        id: id.to_string(),
        message: message.into(),
    })
}

fn invalid_document<D: Document>(message: impl Into<String>) -> StorageError {
    StorageError::Validation(ValidationError::InvalidDocument {
        collection: D::COLLECTION.to_string(),
        message: message.into(),
    })
}

fn invalid_patch<D: Document>(message: impl Into<String>) -> StorageError {
    StorageError::Validation(ValidationError::InvalidPatch {
        collection: D::COLLECTION.to_string(),
        message: message.into(),
    })
}
