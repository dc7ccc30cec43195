//! Removal of studies that never entered the workflow.

use std::sync::Arc;

use annolab_persistence::model::{Object, Study, StudyStatus, Task};
use annolab_persistence::{DocumentStore, SearchQuery};
use tracing::{debug, info, warn};

use crate::collaborators::ArchiveStore;
use crate::error::{WorkflowError, WorkflowResult};
use crate::tasks::MAX_BATCH_IDS;

/// Outcome of [`StudyCleanup::delete_studies`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Studies deleted.
    pub deleted: usize,
    /// Ids kept: missing, assigned, or with tasks.
    pub rejected: Vec<String>,
}

/// Deletes unassigned studies together with their objects and archived files.
#[derive(Debug, Clone)]
pub struct StudyCleanup {
    studies: DocumentStore<Study>,
    tasks: DocumentStore<Task>,
    objects: DocumentStore<Object>,
    archive: Arc<dyn ArchiveStore>,
}

impl StudyCleanup {
    /// Creates the service.
    pub fn new(
        studies: DocumentStore<Study>,
        tasks: DocumentStore<Task>,
        objects: DocumentStore<Object>,
        archive: Arc<dyn ArchiveStore>,
    ) -> Self {
        Self {
            studies,
            tasks,
            objects,
            archive,
        }
    }

    /// Deletes the studies among `ids` that are `UNASSIGNED` and have no task.
    ///
    /// The guarded study delete goes first. Its objects and archived files are
    /// removed only once it succeeded. An archive failure is logged and does
    /// not undo the deletion.
    pub async fn delete_studies(&self, project_id: &str, ids: &[String]) -> WorkflowResult<CleanupReport> {
        if ids.len() > MAX_BATCH_IDS {
            return Err(WorkflowError::invalid_request(format!(
                "at most {} ids per request, got {}",
                MAX_BATCH_IDS,
                ids.len()
            )));
        }

        let mut report = CleanupReport::default();
        for id in ids {
            let deletable = SearchQuery::by_id(id.as_str())
                .filter("project_id", project_id)
                .filter("status", StudyStatus::Unassigned.as_str());

            let Some(study) = self.studies.find(&deletable).await? else {
                debug!(study_id = %id, "Study missing or not unassigned, keeping");
                report.rejected.push(id.clone());
                continue;
            };

            let tasks = self
                .tasks
                .count(&SearchQuery::new().filter("study_id", id.as_str()))
                .await?;
            if tasks > 0 {
                debug!(study_id = %id, tasks, "Study has tasks, keeping");
                report.rejected.push(id.clone());
                continue;
            }

            if self.studies.delete(&deletable).await? == 0 {
                debug!(study_id = %id, "Study left UNASSIGNED before the delete, keeping");
                report.rejected.push(id.clone());
                continue;
            }
            report.deleted += 1;

            self.objects
                .delete(&SearchQuery::new().filter("study_id", id.as_str()))
                .await?;

            if let Some(uid) = study.study_uid() {
                let key = format!("{}.{}", project_id, uid);
                if let Err(e) = self.archive.delete_by_study_key(&key).await {
                    warn!(study_id = %id, key = %key, error = %e, "Archive cleanup failed");
                }
            }
        }

        info!(
            project_id = %project_id,
            deleted = report.deleted,
            rejected = report.rejected.len(),
            "Deleted studies"
        );
        Ok(report)
    }
}
