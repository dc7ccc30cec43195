//! Label statistics and study assignees.

use std::collections::{BTreeMap, BTreeSet};

use annolab_persistence::model::{
    Label, LabelType, ProjectPerson, StudyStatus, TaskStatus, TaskType,
};
use annolab_persistence::{CancelSignal, SearchQuery, Stores};
use serde::Serialize;
use tracing::debug;

use crate::error::{WorkflowError, WorkflowResult};

/// Study ids per task query, and task ids per aggregation request.
pub const STATS_CHUNK_SIZE: usize = 100;

const SCAN_PAGE_SIZE: u64 = 100;

const LABEL_IDS: &str = "label_ids";

/// Annotation counts per label over a project's reviewed studies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelStats {
    /// Annotations carrying each label id.
    pub counts: BTreeMap<String, u64>,
    /// The counted labels that still exist, grouped by label type.
    pub labels: BTreeMap<LabelType, Vec<Label>>,
}

/// Read-only aggregates over the workflow collections.
#[derive(Debug, Clone)]
pub struct StatsService {
    stores: Stores,
}

impl StatsService {
    /// Creates the service.
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Counts label usage in the review annotations of a project.
    ///
    /// Looks at the studies of `project_id` in `study_status`, their `REVIEW`
    /// tasks in `task_status`, and aggregates `label_ids` over those tasks'
    /// annotations. Studies and tasks are queried [`STATS_CHUNK_SIZE`] ids at
    /// a time and the partial counts summed.
    pub async fn label_stats(
        &self,
        project_id: &str,
        study_status: StudyStatus,
        task_status: TaskStatus,
        cancel: &CancelSignal,
    ) -> WorkflowResult<LabelStats> {
        if project_id.is_empty() {
            return Err(WorkflowError::invalid_request("project_id is required"));
        }
        if self
            .stores
            .projects
            .find(&SearchQuery::by_id(project_id))
            .await?
            .is_none()
        {
            return Err(WorkflowError::invalid_request(format!(
                "project {} not found",
                project_id
            )));
        }

        let study_ids: Vec<String> = self
            .stores
            .studies
            .scan_all(
                &SearchQuery::new()
                    .filter("project_id", project_id)
                    .filter("status", study_status.as_str())
                    .sort_by("id"),
                SCAN_PAGE_SIZE,
                cancel,
            )
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let mut stats = LabelStats::default();
        for studies in study_ids.chunks(STATS_CHUNK_SIZE) {
            let task_ids: Vec<String> = self
                .stores
                .tasks
                .scan_all(
                    &SearchQuery::new()
                        .filter_any("study_id", studies.iter().map(String::as_str))
                        .filter("type", TaskType::Review.as_str())
                        .filter("status", task_status.as_str())
                        .sort_by("id"),
                    SCAN_PAGE_SIZE,
                    cancel,
                )
                .await?
                .into_iter()
                .map(|t| t.id)
                .collect();

            for tasks in task_ids.chunks(STATS_CHUNK_SIZE) {
                cancel.check("label stats")?;
                let page = self
                    .stores
                    .annotations
                    .list(
                        &SearchQuery::new()
                            .filter_any("task_id", tasks.iter().map(String::as_str))
                            .aggregate(LABEL_IDS)
                            .page(0, 0),
                    )
                    .await?;
                if let Some(agg) = page.aggregations.get(LABEL_IDS) {
                    for bucket in &agg.buckets {
                        *stats.counts.entry(bucket.key_string()).or_insert(0) += bucket.doc_count;
                    }
                }
            }
        }

        if !stats.counts.is_empty() {
            let labels = self
                .stores
                .labels
                .scan_all(
                    &SearchQuery::new()
                        .filter_any("_id", stats.counts.keys().map(String::as_str))
                        .sort_by("id"),
                    SCAN_PAGE_SIZE,
                    cancel,
                )
                .await?;
            for label in labels {
                stats.labels.entry(label.label_type).or_default().push(label);
            }
        }

        debug!(
            project_id = %project_id,
            studies = study_ids.len(),
            labels = stats.counts.len(),
            "Computed label stats"
        );
        Ok(stats)
    }

    /// Members of the study's project holding a task on the study.
    pub async fn study_assignees(
        &self,
        study_id: &str,
        cancel: &CancelSignal,
    ) -> WorkflowResult<Vec<ProjectPerson>> {
        if study_id.is_empty() {
            return Err(WorkflowError::invalid_request("study id is required"));
        }
        let Some(study) = self.stores.studies.find(&SearchQuery::by_id(study_id)).await? else {
            return Err(WorkflowError::invalid_request(format!(
                "study {} not found",
                study_id
            )));
        };
        let project = self
            .stores
            .projects
            .get_by_id(&study.project_id)
            .await?;

        let assignees: BTreeSet<String> = self
            .stores
            .tasks
            .scan_all(
                &SearchQuery::new().filter("study_id", study_id).sort_by("id"),
                SCAN_PAGE_SIZE,
                cancel,
            )
            .await?
            .into_iter()
            .map(|t| t.assignee_id)
            .collect();

        Ok(project
            .people
            .into_iter()
            .filter(|person| assignees.contains(&person.id))
            .collect())
    }
}
