//! Annotation listing with creator names, and saving a task's annotations.

use std::collections::BTreeMap;
use std::sync::Arc;

use annolab_persistence::model::{
    Annotation, AnnotationEvent, AnnotationType, Task, TaskPatch, TaskStatus,
};
use annolab_persistence::store::now_ms;
use annolab_persistence::{BulkReport, CancelSignal, DocumentStore, SearchPage, SearchQuery};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::IdentityLookup;
use crate::error::{WorkflowError, WorkflowResult};

const UPDATE_ATTEMPTS: u32 = 3;

/// Annotation changes of one task, sent together with the task comment.
///
/// Each annotation's `event` says what to do with it. A `CREATED` annotation
/// with an empty id is new. An `UPDATED` one replaces the stored document and
/// must keep its original `created` time so it lands in the same shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveAnnotationsRequest {
    /// The changes, in any order.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// New task comment.
    #[serde(default)]
    pub comment: String,
}

/// Outcome of [`AnnotationCatalog::save_for_task`].
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Bulk accounting of the created and updated annotations, over every
    /// annotation type.
    pub written: BulkReport,
    /// Annotations deleted.
    pub deleted: u64,
    /// Existing annotations of another creator, left alone.
    pub unauthorized: usize,
    /// `UPDATED` or `DELETED` changes without an id.
    pub ignored: usize,
}

/// Reads annotations and fills in who created them.
#[derive(Debug, Clone)]
pub struct AnnotationCatalog {
    annotations: DocumentStore<Annotation>,
    tasks: DocumentStore<Task>,
    identity: Arc<dyn IdentityLookup>,
}

impl AnnotationCatalog {
    /// Creates a catalog.
    pub fn new(
        annotations: DocumentStore<Annotation>,
        tasks: DocumentStore<Task>,
        identity: Arc<dyn IdentityLookup>,
    ) -> Self {
        Self {
            annotations,
            tasks,
            identity,
        }
    }

    /// Lists annotations with `creator_name` filled in.
    ///
    /// Each creator is looked up once per call. Unknown users and failed
    /// lookups leave the name empty.
    pub async fn list_with_creators(&self, query: &SearchQuery) -> WorkflowResult<SearchPage<Annotation>> {
        let mut page = self.annotations.list(query).await?;

        let mut names: BTreeMap<String, String> = BTreeMap::new();
        for annotation in &page.documents {
            if annotation.creator_id.is_empty() || names.contains_key(&annotation.creator_id) {
                continue;
            }
            let name = match self.identity.resolve(&annotation.creator_id).await {
                Ok(name) => name.unwrap_or_default(),
                Err(e) => {
                    warn!(user_id = %annotation.creator_id, error = %e, "Creator lookup failed");
                    String::new()
                }
            };
            names.insert(annotation.creator_id.clone(), name);
        }

        for annotation in &mut page.documents {
            if let Some(name) = names.get(&annotation.creator_id) {
                annotation.creator_name = name.clone();
            }
        }
        Ok(page)
    }

    /// Saves the annotation changes `caller_id` made on a task.
    ///
    /// Rejects a `COMPLETED` task. Sets the task comment, then bulk-writes
    /// the created and updated annotations one annotation type at a time and
    /// deletes the `DELETED` ones. Existing annotations of other creators are
    /// skipped. Every written annotation is attached to the task's project,
    /// study and id.
    pub async fn save_for_task(
        &self,
        task_id: &str,
        request: &SaveAnnotationsRequest,
        caller_id: &str,
        cancel: &CancelSignal,
    ) -> WorkflowResult<SaveReport> {
        if caller_id.is_empty() {
            return Err(WorkflowError::invalid_request("caller is required"));
        }
        let task = self.tasks.get_by_id(task_id).await?;
        if task.status == TaskStatus::Completed {
            return Err(WorkflowError::invalid_request(format!(
                "task {} is completed, its annotations are final",
                task_id
            )));
        }

        let comment = TaskPatch {
            comment: Some(request.comment.clone()),
            ..Default::default()
        };
        self.tasks
            .update_with_retry(task_id, &comment, UPDATE_ATTEMPTS)
            .await?;

        let mut report = SaveReport::default();
        let mut by_type: BTreeMap<AnnotationType, Vec<Annotation>> = BTreeMap::new();
        let mut delete_ids: Vec<&str> = Vec::new();
        let now = now_ms();

        for change in &request.annotations {
            if !change.id.is_empty() && change.creator_id != caller_id {
                report.unauthorized += 1;
                continue;
            }
            match (change.event, change.id.is_empty()) {
                (AnnotationEvent::Created, true) => {
                    let mut fresh = Annotation::new(
                        change.annotation_type,
                        task.project_id.as_str(),
                        task.study_id.as_str(),
                        task.id.as_str(),
                        change.object_id.as_str(),
                        caller_id,
                    );
                    fresh.description = change.description.clone();
                    fresh.data = change.data.clone();
                    fresh.meta = change.meta.clone();
                    fresh.label_ids = change.label_ids.clone();
                    by_type.entry(fresh.annotation_type).or_default().push(fresh);
                }
                (AnnotationEvent::Created | AnnotationEvent::Updated, false) => {
                    let mut updated = change.clone();
                    updated.project_id = task.project_id.clone();
                    updated.study_id = task.study_id.clone();
                    updated.task_id = task.id.clone();
                    updated.creator_name = String::new();
                    updated.modified = Some(now);
                    by_type.entry(updated.annotation_type).or_default().push(updated);
                }
                (AnnotationEvent::Deleted, false) => delete_ids.push(change.id.as_str()),
                (AnnotationEvent::Updated | AnnotationEvent::Deleted, true) => report.ignored += 1,
            }
        }
        if report.unauthorized > 0 {
            debug!(task_id = %task_id, skipped = report.unauthorized, "Skipped annotations of other creators");
        }

        for (annotation_type, group) in &by_type {
            debug!(task_id = %task_id, annotation_type = %annotation_type, count = group.len(), "Writing annotations");
            report.written.absorb(self.annotations.bulk_write(group, cancel).await);
        }

        if !delete_ids.is_empty() {
            report.deleted = self
                .annotations
                .delete(
                    &SearchQuery::new()
                        .filter_any("_id", delete_ids.iter().copied())
                        .filter("task_id", task.id.as_str())
                        .filter("creator_id", caller_id),
                )
                .await?;
        }

        info!(
            task_id = %task_id,
            indexed = report.written.indexed,
            errored = report.written.errored,
            deleted = report.deleted,
            unauthorized = report.unauthorized,
            "Saved task annotations"
        );
        Ok(report)
    }
}
