//! Object expansion.
//!
//! A study upload declares the DICOM identifiers it contains. Each declaration
//! expands into study-, series- and image-level [`Object`]s, skipping those
//! that already exist. Declarations are queued on a bounded channel and
//! drained by a single worker task:
//!
//! - producers either wait for a slot ([`ObjectExpansionQueue::enqueue`]) or
//!   fail fast ([`ObjectExpansionQueue::try_enqueue`]);
//! - the worker stops on shutdown or once every producer is gone, after
//!   finishing the declaration in hand.

use std::collections::BTreeSet;

use annolab_persistence::model::{Object, ObjectMeta, ObjectType};
use annolab_persistence::{BulkReport, CancelSignal, DocumentStore, SearchQuery};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{WorkflowError, WorkflowResult};

/// Default capacity of the declaration queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// DICOM identifiers found in one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeclaration {
    /// Project of the study.
    pub project_id: String,
    /// Study the objects belong to.
    pub study_id: String,
    /// Study-level identifiers.
    #[serde(default)]
    pub study_instance_uids: Vec<String>,
    /// Series-level identifiers.
    #[serde(default)]
    pub series_instance_uids: Vec<String>,
    /// Image-level identifiers.
    #[serde(default)]
    pub sop_instance_uids: Vec<String>,
}

impl ObjectDeclaration {
    /// Identifiers of every object the declaration implies, study level
    /// first, without duplicates.
    pub fn candidates(&self) -> Vec<ObjectMeta> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut push = |meta: ObjectMeta| {
            let key = (
                meta.study_instance_uid.clone(),
                meta.series_instance_uid.clone(),
                meta.sop_instance_uid.clone(),
            );
            if seen.insert(key) {
                out.push(meta);
            }
        };

        for study in &self.study_instance_uids {
            push(ObjectMeta::new(study, None, None));
        }
        for study in &self.study_instance_uids {
            for series in &self.series_instance_uids {
                push(ObjectMeta::new(study, Some(series), None));
            }
        }
        for study in &self.study_instance_uids {
            for series in &self.series_instance_uids {
                for sop in &self.sop_instance_uids {
                    push(ObjectMeta::new(study, Some(series), Some(sop)));
                }
            }
        }
        out
    }
}

/// Outcome of one expansion.
#[derive(Debug, Clone, Default)]
pub struct ExpansionReport {
    /// Objects the declaration implies.
    pub declared: usize,
    /// Of which already stored.
    pub existing: usize,
    /// Bulk accounting of the new ones.
    pub bulk: BulkReport,
}

/// Expands declarations into stored objects.
#[derive(Debug, Clone)]
pub struct ObjectExpander {
    objects: DocumentStore<Object>,
}

impl ObjectExpander {
    /// Creates an expander over the object store.
    pub fn new(objects: DocumentStore<Object>) -> Self {
        Self { objects }
    }

    async fn exists(
        &self,
        declaration: &ObjectDeclaration,
        level: ObjectType,
        meta: &ObjectMeta,
    ) -> WorkflowResult<bool> {
        let mut query = SearchQuery::new()
            .filter("project_id", declaration.project_id.as_str())
            .filter("study_id", declaration.study_id.as_str())
            .filter("type", level.as_str())
            .filter("meta.study_instance_uid", meta.study_instance_uid.as_str());
        if level != ObjectType::Study {
            query = query.filter("meta.series_instance_uid", meta.series_instance_uid.as_str());
        }
        if level == ObjectType::Image {
            query = query.filter("meta.sop_instance_uid", meta.sop_instance_uid.as_str());
        }
        Ok(self.objects.count(&query).await? > 0)
    }

    /// Writes the objects of `declaration` that are not stored yet.
    pub async fn expand(
        &self,
        declaration: &ObjectDeclaration,
        cancel: &CancelSignal,
    ) -> WorkflowResult<ExpansionReport> {
        let candidates = declaration.candidates();
        let mut report = ExpansionReport {
            declared: candidates.len(),
            ..Default::default()
        };

        let mut fresh = Vec::new();
        for meta in candidates {
            cancel.check("expand objects")?;
            let Some(level) = meta.level() else {
                continue;
            };
            if self.exists(declaration, level, &meta).await? {
                report.existing += 1;
                continue;
            }
            if let Some(object) = Object::new(&declaration.project_id, &declaration.study_id, meta) {
                fresh.push(object);
            }
        }

        if !fresh.is_empty() {
            report.bulk = self.objects.bulk_write(&fresh, cancel).await;
        }

        debug!(
            study_id = %declaration.study_id,
            declared = report.declared,
            existing = report.existing,
            indexed = report.bulk.indexed,
            "Expanded objects"
        );
        Ok(report)
    }
}

/// Producer side of the declaration queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ObjectExpansionQueue {
    sender: mpsc::Sender<ObjectDeclaration>,
}

impl ObjectExpansionQueue {
    /// Queues a declaration, waiting for a free slot.
    pub async fn enqueue(&self, declaration: ObjectDeclaration) -> WorkflowResult<()> {
        self.sender
            .send(declaration)
            .await
            .map_err(|_| WorkflowError::QueueClosed)
    }

    /// Queues a declaration if a slot is free.
    pub fn try_enqueue(&self, declaration: ObjectDeclaration) -> WorkflowResult<()> {
        self.sender.try_send(declaration).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkflowError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkflowError::QueueClosed,
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

/// Totals of a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Declarations expanded.
    pub processed: usize,
    /// Declarations whose expansion failed.
    pub failed: usize,
    /// Objects written.
    pub created: usize,
}

/// Drains the declaration queue.
#[derive(Debug)]
pub struct ObjectExpansionWorker;

impl ObjectExpansionWorker {
    /// Spawns the worker and returns the queue feeding it.
    ///
    /// The worker exits when `shutdown` fires or every queue handle is
    /// dropped; the join handle yields its totals.
    pub fn start(
        expander: ObjectExpander,
        capacity: usize,
        shutdown: CancelSignal,
    ) -> (ObjectExpansionQueue, JoinHandle<WorkerSummary>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::run(expander, receiver, shutdown));
        (ObjectExpansionQueue { sender }, handle)
    }

    async fn run(
        expander: ObjectExpander,
        mut receiver: mpsc::Receiver<ObjectDeclaration>,
        mut shutdown: CancelSignal,
    ) -> WorkerSummary {
        info!("Object expansion worker started");
        let mut summary = WorkerSummary::default();

        loop {
            let declaration = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(declaration) => declaration,
                    None => break,
                },
            };

            // The declaration in hand is finished even if shutdown fires now
            match expander.expand(&declaration, &CancelSignal::never()).await {
                Ok(report) => {
                    summary.processed += 1;
                    summary.created += report.bulk.indexed;
                    if report.bulk.errored > 0 {
                        error!(
                            study_id = %declaration.study_id,
                            errored = report.bulk.errored,
                            "Some objects were not written"
                        );
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(study_id = %declaration.study_id, error = %e, "Object expansion failed");
                }
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            created = summary.created,
            "Object expansion worker stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration() -> ObjectDeclaration {
        ObjectDeclaration {
            project_id: "p-1".into(),
            study_id: "s-1".into(),
            study_instance_uids: vec!["1".into()],
            series_instance_uids: vec!["1.1".into(), "1.2".into()],
            sop_instance_uids: vec!["1.1.1".into(), "1.1.1".into()],
        }
    }

    #[test]
    fn test_candidates_by_level() {
        let candidates = declaration().candidates();
        let levels: Vec<_> = candidates.iter().filter_map(ObjectMeta::level).collect();
        assert_eq!(
            levels,
            vec![
                ObjectType::Study,
                ObjectType::Series,
                ObjectType::Series,
                ObjectType::Image,
                ObjectType::Image,
            ]
        );
    }

    #[test]
    fn test_no_study_uid_no_candidates() {
        let mut declaration = declaration();
        declaration.study_instance_uids.clear();
        assert!(declaration.candidates().is_empty());
    }
}
