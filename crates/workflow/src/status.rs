//! Study status derived from the statuses of its tasks.
//!
//! A study is `UNASSIGNED` without tasks, `COMPLETED` when every task is
//! completed and `ASSIGNED` otherwise. The status is recomputed from a fresh
//! tally after every change to the study's task set or task statuses;
//! archiving a task does not change it.

use std::collections::BTreeMap;

use annolab_persistence::model::{Study, StudyPatch, StudyStatus, Task, TaskStatus};
use annolab_persistence::{DocumentStore, SearchQuery};
use tracing::{debug, error};

use crate::error::{WorkflowError, WorkflowResult};

/// Attempts of the conflict-retrying study update.
pub const DEFAULT_UPDATE_ATTEMPTS: u32 = 3;

/// Task counts of one study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskTally {
    /// Tasks of the study.
    pub total: u64,
    /// Of which completed.
    pub completed: u64,
}

/// Status implied by a tally, `None` if the tally is inconsistent.
pub fn derive_status(tally: TaskTally) -> Option<StudyStatus> {
    let TaskTally { total, completed } = tally;
    if completed > total {
        return None;
    }
    Some(match (completed, total) {
        (_, 0) => StudyStatus::Unassigned,
        (0, _) => StudyStatus::Assigned,
        (c, t) if c == t => StudyStatus::Completed,
        _ => StudyStatus::Assigned,
    })
}

/// Recomputes and persists study statuses.
#[derive(Debug, Clone)]
pub struct StatusPropagator {
    tasks: DocumentStore<Task>,
    studies: DocumentStore<Study>,
    attempts: u32,
}

impl StatusPropagator {
    /// Creates a propagator over the task and study stores.
    pub fn new(tasks: DocumentStore<Task>, studies: DocumentStore<Study>) -> Self {
        Self {
            tasks,
            studies,
            attempts: DEFAULT_UPDATE_ATTEMPTS,
        }
    }

    /// Sets the attempts of the study update.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Counts the study's tasks in one aggregation request.
    pub async fn tally(&self, project_id: &str, study_id: &str) -> WorkflowResult<TaskTally> {
        let page = self
            .tasks
            .list(
                &SearchQuery::new()
                    .filter("project_id", project_id)
                    .filter("study_id", study_id)
                    .aggregate("status")
                    .page(0, 0),
            )
            .await?;

        let completed = page
            .aggregations
            .get("status")
            .map(|agg| agg.count_of(TaskStatus::Completed.as_str()))
            .unwrap_or_default();

        Ok(TaskTally {
            total: page.total,
            completed,
        })
    }

    /// Derives the study's status from its tasks and persists it.
    pub async fn recompute(&self, project_id: &str, study_id: &str) -> WorkflowResult<StudyStatus> {
        let tally = self.tally(project_id, study_id).await?;

        let Some(status) = derive_status(tally) else {
            error!(
                project_id = %project_id,
                study_id = %study_id,
                completed = tally.completed,
                total = tally.total,
                "More completed tasks than tasks"
            );
            return Err(WorkflowError::ConsistencyViolation {
                study_id: study_id.to_string(),
                completed: tally.completed,
                total: tally.total,
            });
        };

        self.studies
            .update_with_retry(study_id, &StudyPatch::status(status), self.attempts)
            .await?;

        debug!(
            study_id = %study_id,
            status = %status,
            total = tally.total,
            completed = tally.completed,
            "Recomputed study status"
        );
        Ok(status)
    }

    /// [`recompute`](Self::recompute) for several `(project_id, study_id)`
    /// pairs, stopping at the first error.
    pub async fn recompute_many<'a, I>(&self, studies: I) -> WorkflowResult<BTreeMap<String, StudyStatus>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut statuses = BTreeMap::new();
        for (project_id, study_id) in studies {
            if statuses.contains_key(study_id) {
                continue;
            }
            let status = self.recompute(project_id, study_id).await?;
            statuses.insert(study_id.to_string(), status);
        }
        Ok(statuses)
    }
}
