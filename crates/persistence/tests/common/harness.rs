//! Test harness: a fresh backend and store bundle per test.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Barrier;

use annolab_persistence::backends::memory::InMemoryBackend;
use annolab_persistence::backends::{
    BulkResponse, IndexTemplate, SearchBackend, SearchResponse, VersionGuard, WriteOutcome,
};
use annolab_persistence::error::StorageResult;
use annolab_persistence::stores::{IndexPrefixes, Stores};

/// A backend plus the stores built on it.
pub struct TestContext {
    /// The in-memory backend, for raw inspection.
    pub memory: Arc<InMemoryBackend>,
    /// Every collection.
    pub stores: Stores,
}

impl TestContext {
    /// Stores over a plain in-memory backend.
    pub fn new() -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        let stores = Stores::new(memory.clone(), &IndexPrefixes::default());
        Self { memory, stores }
    }

    /// Stores whose first `gated_searches` searches wait for each other.
    pub fn gated(gated_searches: usize) -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        let gated = Arc::new(GatedBackend::new(memory.clone(), gated_searches));
        let stores = Stores::new(gated, &IndexPrefixes::default());
        Self { memory, stores }
    }
}

/// Holds the first N searches until all N have read, then lets them go.
///
/// Forces concurrent read-modify-write cycles to interleave: every reader
/// sees the same version before any of them writes.
#[derive(Debug)]
pub struct GatedBackend {
    inner: Arc<InMemoryBackend>,
    gate: Barrier,
    gated: usize,
    seen: AtomicUsize,
}

impl GatedBackend {
    /// Gates the first `gated` searches.
    pub fn new(inner: Arc<InMemoryBackend>, gated: usize) -> Self {
        Self {
            inner,
            gate: Barrier::new(gated.max(1)),
            gated,
            seen: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchBackend for GatedBackend {
    fn backend_name(&self) -> &'static str {
        "gated"
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
        let response = self.inner.search(index_pattern, body).await?;
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.gated {
            self.gate.wait().await;
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
