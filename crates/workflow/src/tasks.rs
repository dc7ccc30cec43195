//! Task lifecycle: status changes, archiving, comments and deletion.

use std::collections::{BTreeMap, BTreeSet};

use annolab_persistence::model::{Annotation, StudyStatus, Task, TaskPatch, TaskStatus};
use annolab_persistence::store::now_ms;
use annolab_persistence::{BulkReport, CancelSignal, DocumentStore, SearchQuery};
use tracing::info;

use crate::error::{WorkflowError, WorkflowResult};
use crate::status::StatusPropagator;

/// Most ids accepted by the batch operations.
pub const MAX_BATCH_IDS: usize = 100;

/// Attempts of single-task updates.
const UPDATE_ATTEMPTS: u32 = 3;

/// Outcome of [`TaskManager::update_status_many`].
#[derive(Debug, Clone, Default)]
pub struct StatusUpdateReport {
    /// Bulk accounting of the rewritten tasks.
    pub bulk: BulkReport,
    /// New status of every touched study.
    pub studies: BTreeMap<String, StudyStatus>,
}

/// Outcome of [`TaskManager::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Tasks deleted.
    pub deleted: u64,
    /// Ids not deleted: missing, or no longer `NEW`.
    pub skipped: u64,
    /// Annotations deleted with the tasks.
    pub annotations_deleted: u64,
}

/// Mutations of existing tasks.
#[derive(Debug, Clone)]
pub struct TaskManager {
    tasks: DocumentStore<Task>,
    annotations: DocumentStore<Annotation>,
    propagator: StatusPropagator,
}

fn check_batch(ids: &[String]) -> WorkflowResult<()> {
    if ids.is_empty() {
        return Err(WorkflowError::invalid_request("ids is empty"));
    }
    if ids.len() > MAX_BATCH_IDS {
        return Err(WorkflowError::invalid_request(format!(
            "at most {} ids per request, got {}",
            MAX_BATCH_IDS,
            ids.len()
        )));
    }
    Ok(())
}

impl TaskManager {
    /// Creates a manager.
    pub fn new(
        tasks: DocumentStore<Task>,
        annotations: DocumentStore<Annotation>,
        propagator: StatusPropagator,
    ) -> Self {
        Self {
            tasks,
            annotations,
            propagator,
        }
    }

    /// Sets a task's status and recomputes its study.
    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> WorkflowResult<StudyStatus> {
        let task = self.tasks.get_by_id(task_id).await?;
        self.tasks
            .update_with_retry(task_id, &TaskPatch::status(status), UPDATE_ATTEMPTS)
            .await?;
        self.propagator.recompute(&task.project_id, &task.study_id).await
    }

    /// Sets the status of up to [`MAX_BATCH_IDS`] tasks in one bulk write and
    /// recomputes every touched study.
    ///
    /// Fails without writing if any id is missing.
    pub async fn update_status_many(
        &self,
        ids: &[String],
        status: TaskStatus,
        cancel: &CancelSignal,
    ) -> WorkflowResult<StatusUpdateReport> {
        check_batch(ids)?;

        let now = now_ms();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            cancel.check("update task statuses")?;
            let mut task = self.tasks.get_by_id(id).await?;
            task.status = status;
            task.modified = now;
            tasks.push(task);
        }

        let bulk = self.tasks.bulk_write(&tasks, cancel).await;

        let touched: BTreeSet<(&str, &str)> = tasks
            .iter()
            .map(|t| (t.project_id.as_str(), t.study_id.as_str()))
            .collect();
        let studies = self.propagator.recompute_many(touched).await?;

        info!(
            status = %status,
            indexed = bulk.indexed,
            errored = bulk.errored,
            studies = studies.len(),
            "Updated task statuses"
        );
        Ok(StatusUpdateReport { bulk, studies })
    }

    /// Archives or restores a task. Study status is not affected.
    pub async fn set_archived(&self, task_id: &str, archived: bool) -> WorkflowResult<()> {
        let patch = TaskPatch {
            archived: Some(archived),
            ..Default::default()
        };
        self.tasks.update_with_retry(task_id, &patch, UPDATE_ATTEMPTS).await?;
        Ok(())
    }

    /// Replaces a task's comment.
    pub async fn set_comment(&self, task_id: &str, comment: &str) -> WorkflowResult<()> {
        let patch = TaskPatch {
            comment: Some(comment.to_string()),
            ..Default::default()
        };
        self.tasks.update_with_retry(task_id, &patch, UPDATE_ATTEMPTS).await?;
        Ok(())
    }

    /// Deletes the `NEW` tasks among `ids` with their annotations, then
    /// recomputes the affected studies.
    ///
    /// Tasks in any other status are left alone and counted as skipped.
    pub async fn delete(&self, ids: &[String]) -> WorkflowResult<DeleteReport> {
        check_batch(ids)?;

        let found = self
            .tasks
            .list(
                &SearchQuery::new()
                    .filter_any("_id", ids.iter().map(String::as_str))
                    .page(0, ids.len() as u64),
            )
            .await?
            .documents;

        let new_tasks: Vec<&Task> = found.iter().filter(|t| t.status == TaskStatus::New).collect();

        let deleted = if new_tasks.is_empty() {
            0
        } else {
            self.tasks
                .delete(
                    &SearchQuery::new()
                        .filter_any("_id", new_tasks.iter().map(|t| t.id.as_str()))
                        .filter("status", TaskStatus::New.as_str()),
                )
                .await?
        };

        // A task may have left NEW between the listing and the guarded
        // delete; only the ones actually gone lose their annotations.
        let gone: Vec<&Task> = if deleted == 0 {
            Vec::new()
        } else if deleted as usize == new_tasks.len() {
            new_tasks
        } else {
            let survivors: BTreeSet<String> = self
                .tasks
                .list(
                    &SearchQuery::new()
                        .filter_any("_id", new_tasks.iter().map(|t| t.id.as_str()))
                        .page(0, new_tasks.len() as u64),
                )
                .await?
                .documents
                .into_iter()
                .map(|t| t.id)
                .collect();
            new_tasks
                .into_iter()
                .filter(|t| !survivors.contains(&t.id))
                .collect()
        };

        let annotations_deleted = if gone.is_empty() {
            0
        } else {
            self.annotations
                .delete(&SearchQuery::new().filter_any("task_id", gone.iter().map(|t| t.id.as_str())))
                .await?
        };

        let touched: BTreeSet<(&str, &str)> = gone
            .iter()
            .map(|t| (t.project_id.as_str(), t.study_id.as_str()))
            .collect();
        self.propagator.recompute_many(touched).await?;

        let report = DeleteReport {
            deleted,
            skipped: (ids.len() as u64).saturating_sub(deleted),
            annotations_deleted,
        };
        info!(
            requested = ids.len(),
            deleted = report.deleted,
            skipped = report.skipped,
            "Deleted tasks"
        );
        Ok(report)
    }
}
