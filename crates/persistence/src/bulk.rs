//! Batched NDJSON bulk writes with per-item accounting.
//!
//! [`BulkWriter::write`] never fails as a whole. Every input document ends up
//! in exactly one of `indexed`, `errored` or `skipped`; a batch lost to a
//! transport error counts all of its documents as errored. Nothing is rolled
//! back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::backends::SearchBackend;
use crate::cancel::CancelSignal;

/// Documents per `_bulk` request unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// One document to index.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    /// Target shard.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document body.
    pub document: Value,
}

/// One failed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// Target shard.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Item status, `None` when the batch never got an answer.
    pub status: Option<u16>,
    /// Backend error type.
    pub error_type: String,
    /// Backend reason.
    pub reason: String,
}

/// Accounting of one bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    /// Documents acknowledged with status 200 or 201.
    pub indexed: usize,
    /// Documents rejected by the backend or lost with their batch.
    pub errored: usize,
    /// Documents never sent because the write was cancelled.
    pub skipped: usize,
    /// Number of `_bulk` requests sent.
    pub batches: usize,
    /// Details of every errored document.
    pub failures: Vec<BulkFailure>,
    /// Wall time of the write.
    pub elapsed: Duration,
}

impl BulkReport {
    /// Total number of documents accounted for.
    pub fn total(&self) -> usize {
        self.indexed + self.errored + self.skipped
    }

    /// True when every document was indexed.
    pub fn is_complete(&self) -> bool {
        self.errored == 0 && self.skipped == 0
    }

    /// Indexing throughput in documents per second.
    pub fn docs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.indexed as f64 / secs
        } else {
            self.indexed as f64
        }
    }

    /// Merges another report into this one.
    pub fn absorb(&mut self, other: BulkReport) {
        self.indexed += other.indexed;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.batches += other.batches;
        self.failures.extend(other.failures);
        self.elapsed += other.elapsed;
    }
}

/// Sends documents to the backend in fixed-size `_bulk` batches.
#[derive(Debug, Clone)]
pub struct BulkWriter {
    backend: Arc<dyn SearchBackend>,
    batch_size: usize,
}

impl BulkWriter {
    /// Creates a writer with [`DEFAULT_BATCH_SIZE`].
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes all entries, checking `cancel` before each batch.
    pub async fn write(&self, entries: Vec<BulkEntry>, cancel: &CancelSignal) -> BulkReport {
        let started = Instant::now();
        let mut report = BulkReport::default();
        let total = entries.len();

        for (position, batch) in entries.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.skipped = total - position * self.batch_size;
                warn!(skipped = report.skipped, "Bulk write cancelled");
                break;
            }
            self.send_batch(batch, &mut report).await;
        }

        report.elapsed = started.elapsed();
        info!(
            indexed = report.indexed,
            errored = report.errored,
            skipped = report.skipped,
            batches = report.batches,
            docs_per_sec = format!("{:.1}", report.docs_per_second()),
            "Bulk write finished"
        );
        if report.errored > 0 {
            let summary: Vec<String> = report
                .failures
                .iter()
                .take(5)
                .map(|f| format!("{}: {} {}", f.id, f.error_type, f.reason))
                .collect();
            warn!(errored = report.errored, first = ?summary, "Bulk write had failures");
        }

        report
    }

    async fn send_batch(&self, batch: &[BulkEntry], report: &mut BulkReport) {
        let lines = to_ndjson(batch);
        report.batches += 1;

        match self.backend.bulk(lines).await {
            Ok(response) => {
                debug!(took = response.took, items = response.items.len(), "Bulk batch sent");
                for (position, entry) in batch.iter().enumerate() {
                    match response.items.get(position) {
                        Some(item) if item.is_success() => report.indexed += 1,
                        Some(item) => {
                            let (error_type, reason) = item
                                .error
                                .as_ref()
                                .map(|e| (e.error_type.clone(), e.reason.clone()))
                                .unwrap_or_else(|| ("unknown".to_string(), String::new()));
                            report.errored += 1;
                            report.failures.push(BulkFailure {
                                index: entry.index.clone(),
                                id: entry.id.clone(),
                                status: Some(item.status),
                                error_type,
                                reason,
                            });
                        }
                        None => {
                            report.errored += 1;
                            report.failures.push(BulkFailure {
                                index: entry.index.clone(),
                                id: entry.id.clone(),
                                status: None,
                                error_type: "missing_item".to_string(),
                                reason: "no item in bulk response".to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                warn!(size = batch.len(), error = %e, "Bulk batch failed");
                let reason = e.to_string();
                report.errored += batch.len();
                report
                    .failures
                    .extend(batch.iter().map(|entry| BulkFailure {
                        index: entry.index.clone(),
                        id: entry.id.clone(),
                        status: None,
                        error_type: "transport".to_string(),
                        reason: reason.clone(),
                    }));
            }
        }
    }
}

/// Serializes entries as `index` action/document line pairs.
pub fn to_ndjson(entries: &[BulkEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| {
            [
                json!({ "index": { "_index": entry.index, "_id": entry.id } }).to_string(),
                entry.document.to_string(),
            ]
        })
        .collect()
}
