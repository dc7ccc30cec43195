//! Test harness: services over a fresh backend, plus misbehaving doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use annolab_persistence::backends::memory::InMemoryBackend;
use annolab_persistence::backends::{
    Bucket, BulkResponse, IndexTemplate, SearchBackend, SearchResponse, VersionGuard, WriteOutcome,
};
use annolab_persistence::error::StorageResult;
use annolab_persistence::{IndexPrefixes, Stores};
use annolab_workflow::Services;
use annolab_workflow::collaborators::{InMemoryArchive, InMemoryBlobStore, InMemoryIdentity};
use annolab_workflow::error::SequenceError;
use annolab_workflow::sequence::{InMemorySequence, SequenceGenerator};

/// Services and the doubles behind them.
pub struct TestContext {
    /// The in-memory backend, for raw inspection.
    pub memory: Arc<InMemoryBackend>,
    pub stores: Stores,
    pub services: Services,
    pub sequence: Arc<InMemorySequence>,
    pub identity: Arc<InMemoryIdentity>,
    pub archive: Arc<InMemoryArchive>,
    pub blobs: Arc<InMemoryBlobStore>,
}

impl TestContext {
    /// Services over a plain in-memory backend.
    pub fn new() -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        Self::over(memory.clone(), memory)
    }

    /// Services whose task tallies report `extra` more completed tasks than
    /// are stored.
    pub fn skewed(extra: u64) -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        let skewed = Arc::new(SkewedBackend {
            inner: memory.clone(),
            extra_completed: extra,
        });
        Self::over(memory, skewed)
    }

    /// Services over a backend that can slip a concurrent write in front of
    /// the next delete-by-query.
    pub fn racing() -> (Self, Arc<RacingBackend>) {
        let memory = Arc::new(InMemoryBackend::new());
        let racing = Arc::new(RacingBackend {
            inner: memory.clone(),
            pending: Mutex::new(None),
        });
        (Self::over(memory, racing.clone()), racing)
    }

    fn over(memory: Arc<InMemoryBackend>, backend: Arc<dyn SearchBackend>) -> Self {
        let stores = Stores::new(backend, &IndexPrefixes::default()).with_batch_size(50);
        let sequence = Arc::new(InMemorySequence::new());
        let identity = Arc::new(InMemoryIdentity::new());
        let archive = Arc::new(InMemoryArchive::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let services = Services::new(
            stores.clone(),
            sequence.clone(),
            identity.clone(),
            archive.clone(),
            blobs.clone(),
        );
        Self {
            memory,
            stores,
            services,
            sequence,
            identity,
            archive,
            blobs,
        }
    }

    /// Rebuilds the services with another sequence generator.
    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceGenerator>) -> Self {
        self.services = Services::new(
            self.stores.clone(),
            sequence,
            self.identity.clone(),
            self.archive.clone(),
            self.blobs.clone(),
        );
        self
    }
}

/// Inflates the `COMPLETED` bucket of every `status` aggregation.
#[derive(Debug)]
pub struct SkewedBackend {
    inner: Arc<InMemoryBackend>,
    extra_completed: u64,
}

#[async_trait]
impl SearchBackend for SkewedBackend {
    fn backend_name(&self) -> &'static str {
        "skewed"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }

    async fn initialize(&self, templates: &[IndexTemplate]) -> StorageResult<()> {
        self.inner.initialize(templates).await
    }

    async fn create(&self, index: &str, id: &str, document: Value) -> StorageResult<WriteOutcome> {
        self.inner.create(index, id, document).await
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Value,
        guard: Option<VersionGuard>,
    ) -> StorageResult<WriteOutcome> {
        self.inner.update(index, id, partial, guard).await
    }

    async fn search(&self, index_pattern: &str, body: Value) -> StorageResult<SearchResponse> {
        let mut response = self.inner.search(index_pattern, body).await?;
        if let Some(status) = response.aggregations.get_mut("status") {
            match status.buckets.iter_mut().find(|b| b.key_string() == "COMPLETED") {
                Some(bucket) => bucket.doc_count += self.extra_completed,
                None => status.buckets.push(Bucket {
                    key: json!("COMPLETED"),
                    doc_count: self.extra_completed,
                }),
            }
        }
        Ok(response)
    }

    async fn delete_by_query(&self, index_pattern: &str, body: Value) -> StorageResult<u64> {
        self.inner.delete_by_query(index_pattern, body).await
    }

    async fn bulk(&self, lines: Vec<String>) -> StorageResult<BulkResponse> {
        self.inner.bulk(lines).await
    }
}

#[derive(Debug)]
struct Interloper {
    pattern: String,
    index: String,
    id: String,
    partial: Value,
}

/// Applies one armed write right before the next delete-by-query on a
/// matching index pattern, as another client would between a read and a
/// guarded delete.
#[derive(Debug)]
pub struct RacingBackend {
    inner: Arc<InMemoryBackend>,
    pending: Mutex<Option<Interloper>>,
}

impl RacingBackend {
    /// Merges `partial` into `id` in `index` before the next delete-by-query
    /// over `pattern`.
    pub fn before_delete(
        &self,
        pattern: impl Into<String>,
        index: impl Into<String>,
        id: impl Into<String>,
        partial: Value,
    ) {
        *self.pending.lock() = Some(Interloper {
            pattern: pattern.into(),
            index: index.into(),
            id: id.into(),
            partial,
        });
    }
}

#[async_trait]
impl SearchBackend for RacingBackend {
    fn backend_name(&self) -> &'static str {
        "racing"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }

    async fn initialize(&self, templates: &[IndexTemplate]) -> StorageResult<()> {
        self.inner.initialize(templates).await
    }

    async fn create(&self, index: &str, id: &str, document: Value) -> StorageResult<WriteOutcome> {
        self.inner.create(index, id, document).await
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Value,
        guard: Option<VersionGuard>,
    ) -> StorageResult<WriteOutcome> {
        self.inner.update(index, id, partial, guard).await
    }

    async fn search(&self, index_pattern: &str, body: Value) -> StorageResult<SearchResponse> {
        self.inner.search(index_pattern, body).await
    }

    async fn delete_by_query(&self, index_pattern: &str, body: Value) -> StorageResult<u64> {
        let due = {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|i| i.pattern == index_pattern) {
                pending.take()
            } else {
                None
            }
        };
        if let Some(interloper) = due {
            self.inner
                .update(&interloper.index, &interloper.id, interloper.partial, None)
                .await?;
        }
        self.inner.delete_by_query(index_pattern, body).await
    }

    async fn bulk(&self, lines: Vec<String>) -> StorageResult<BulkResponse> {
        self.inner.bulk(lines).await
    }
}

/// Mints `budget` numbers, then times out.
#[derive(Debug)]
pub struct ExhaustedSequence {
    minted: AtomicU64,
    budget: u64,
}

impl ExhaustedSequence {
    pub fn new(budget: u64) -> Self {
        Self {
            minted: AtomicU64::new(0),
            budget,
        }
    }
}

#[async_trait]
impl SequenceGenerator for ExhaustedSequence {
    async fn next(&self, _key: &str) -> Result<u64, SequenceError> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.budget {
            return Err(SequenceError::Timeout { timeout_ms: 1000 });
        }
        Ok(n)
    }
}
