//! Task distribution.
//!
//! An [`AssignmentRequest`] is served in four steps:
//!
//! 1. validate the request;
//! 2. resolve the candidate studies from the request's source, ordered by id;
//! 3. plan one `(assignee, study)` pair per task and role under the strategy;
//! 4. mint a code per task, bulk-write the tasks of the role and recompute
//!    the status of every touched study.
//!
//! Roles are processed one after the other. A sequence failure aborts the
//! current role; tasks of earlier roles stay written and minted codes are
//! not given back.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use annolab_persistence::model::{Study, Task, TaskType};
use annolab_persistence::{BulkReport, CancelSignal, DocumentStore, SearchQuery};
use tracing::{debug, info, warn};

use crate::assignment::{AssignmentRequest, SearchSpec, Strategy, StudySource};
use crate::error::{WorkflowError, WorkflowResult};
use crate::sequence::{SequenceGenerator, task_code, task_sequence_key};
use crate::status::StatusPropagator;

/// Page size of saved-search resolution.
pub const SEARCH_PAGE_SIZE: u64 = 100;

/// Pairs `(assignee index, study index)` of one role.
///
/// `All` yields every pair, assignee-major. `Equally` gives study `i` to
/// assignee `i mod k`. Duplicate assignees are collapsed first, keeping the
/// first occurrence.
pub fn plan(strategy: Strategy, assignees: &[String], study_count: usize) -> Vec<(usize, usize)> {
    let mut seen = BTreeSet::new();
    let distinct: Vec<usize> = (0..assignees.len())
        .filter(|&i| seen.insert(assignees[i].as_str()))
        .collect();
    if distinct.is_empty() {
        return Vec::new();
    }

    match strategy {
        Strategy::All => distinct
            .iter()
            .flat_map(|&a| (0..study_count).map(move |s| (a, s)))
            .collect(),
        Strategy::Equally => (0..study_count)
            .map(|s| (distinct[s % distinct.len()], s))
            .collect(),
    }
}

/// Outcome of a distribution.
#[derive(Debug, Clone, Default)]
pub struct DistributionReport {
    /// Studies the request resolved to.
    pub studies: Vec<String>,
    /// Tasks planned per role.
    pub planned: BTreeMap<TaskType, usize>,
    /// Bulk accounting over every role.
    pub bulk: BulkReport,
}

/// Creates tasks from assignment requests.
#[derive(Debug, Clone)]
pub struct TaskDistributor {
    studies: DocumentStore<Study>,
    tasks: DocumentStore<Task>,
    sequence: Arc<dyn SequenceGenerator>,
    propagator: StatusPropagator,
}

impl TaskDistributor {
    /// Creates a distributor.
    pub fn new(
        studies: DocumentStore<Study>,
        tasks: DocumentStore<Task>,
        sequence: Arc<dyn SequenceGenerator>,
        propagator: StatusPropagator,
    ) -> Self {
        Self {
            studies,
            tasks,
            sequence,
            propagator,
        }
    }

    /// Resolves the candidate studies of a validated request, ordered by id.
    ///
    /// Ids and UIDs that match nothing are skipped.
    pub async fn resolve_studies(
        &self,
        request: &AssignmentRequest,
        cancel: &CancelSignal,
    ) -> WorkflowResult<Vec<Study>> {
        let project_id = request.project_id.as_str();
        let mut found = BTreeMap::new();

        match request.source() {
            Some(StudySource::Selected(ids)) => {
                for id in ids {
                    cancel.check("resolve studies")?;
                    let query = SearchQuery::by_id(id.as_str()).filter("project_id", project_id);
                    match self.studies.find(&query).await? {
                        Some(study) => {
                            found.insert(study.id.clone(), study);
                        }
                        None => debug!(study_id = %id, "Selected study not found, skipping"),
                    }
                }
            }
            Some(StudySource::File(uids)) => {
                for uid in uids {
                    cancel.check("resolve studies")?;
                    let query = SearchQuery::new()
                        .filter("project_id", project_id)
                        .filter("dicom_tags.StudyInstanceUID", uid.as_str());
                    if let Some(study) = self.studies.find(&query).await? {
                        found.insert(study.id.clone(), study);
                    }
                }
            }
            Some(StudySource::Search(spec)) => {
                for study in self.search_studies(project_id, spec, cancel).await? {
                    found.insert(study.id.clone(), study);
                }
            }
            None => return Err(WorkflowError::invalid_request("search_query is missing")),
        }

        Ok(found.into_values().collect())
    }

    async fn search_studies(
        &self,
        project_id: &str,
        spec: &SearchSpec,
        cancel: &CancelSignal,
    ) -> WorkflowResult<Vec<Study>> {
        let query = SearchQuery::new()
            .filter("project_id", project_id)
            .filter("status", spec.status.as_str())
            .text(spec.query.as_str())
            .sort_by("id");

        let mut collected: Vec<Study> = Vec::new();
        self.studies
            .scan(&query, SEARCH_PAGE_SIZE, cancel, |page| {
                for study in page {
                    if spec.size > 0 && collected.len() >= spec.size {
                        return ControlFlow::Break(());
                    }
                    collected.push(study.clone());
                }
                if spec.size > 0 && collected.len() >= spec.size {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;
        Ok(collected)
    }

    /// Validates the request, creates its tasks and propagates study status.
    ///
    /// Partially failed bulk writes are reported, not raised; see
    /// [`BulkReportExt`](crate::error::BulkReportExt) to turn them into an
    /// error.
    pub async fn distribute(
        &self,
        request: &AssignmentRequest,
        creator_id: &str,
        cancel: &CancelSignal,
    ) -> WorkflowResult<DistributionReport> {
        request.validate()?;

        let studies = self.resolve_studies(request, cancel).await?;
        let mut report = DistributionReport {
            studies: studies.iter().map(|s| s.id.clone()).collect(),
            ..Default::default()
        };
        if studies.is_empty() {
            info!(project_id = %request.project_id, "Assignment resolved no study");
            return Ok(report);
        }

        let sequence_key = task_sequence_key(&request.project_id);
        for (role, assignees) in &request.assignee_ids {
            cancel.check("distribute")?;

            let pairs = plan(request.strategy, assignees, studies.len());
            report.planned.insert(*role, pairs.len());

            let mut tasks = Vec::with_capacity(pairs.len());
            for (assignee, study) in pairs {
                cancel.check("distribute")?;
                let study = &studies[study];
                let n = self.sequence.next(&sequence_key).await?;

                let mut task = Task::new(
                    request.project_id.as_str(),
                    study.id.as_str(),
                    assignees[assignee].as_str(),
                    *role,
                );
                task.code = task_code(n);
                task.study_code = study.code.clone();
                task.creator_id = creator_id.to_string();
                tasks.push(task);
            }

            let written = self.tasks.bulk_write(&tasks, cancel).await;
            if !written.is_complete() {
                warn!(
                    role = %role,
                    indexed = written.indexed,
                    errored = written.errored,
                    skipped = written.skipped,
                    "Tasks of role not fully written"
                );
            }
            let cancelled = written.skipped > 0;
            report.bulk.absorb(written);

            let touched: BTreeSet<&str> = tasks.iter().map(|t| t.study_id.as_str()).collect();
            self.propagator
                .recompute_many(touched.into_iter().map(|s| (request.project_id.as_str(), s)))
                .await?;

            if cancelled {
                return Err(WorkflowError::Cancelled {
                    operation: "distribute".to_string(),
                });
            }
        }

        info!(
            project_id = %request.project_id,
            studies = report.studies.len(),
            indexed = report.bulk.indexed,
            errored = report.bulk.errored,
            "Distributed tasks"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_is_the_cartesian_product() {
        let pairs = plan(Strategy::All, &users(&["a", "b", "c"]), 4);
        assert_eq!(pairs.len(), 12);
        let unique: BTreeSet<_> = pairs.iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_equally_spreads_round_robin() {
        let pairs = plan(Strategy::Equally, &users(&["a", "b", "c"]), 7);
        assert_eq!(pairs.len(), 7);
        assert_eq!(
            pairs.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
            vec![0, 1, 2, 0, 1, 2, 0]
        );

        let mut counts = [0usize; 3];
        for (a, _) in &pairs {
            counts[*a] += 1;
        }
        let max = counts.iter().max().unwrap();
        let min = counts.iter().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_duplicate_assignees_collapse() {
        let pairs = plan(Strategy::All, &users(&["a", "b", "a"]), 2);
        assert_eq!(pairs, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        let pairs = plan(Strategy::Equally, &users(&["a", "a", "b"]), 3);
        assert_eq!(pairs, vec![(0, 0), (2, 1), (0, 2)]);
    }

    #[test]
    fn test_nothing_to_plan() {
        assert!(plan(Strategy::All, &[], 3).is_empty());
        assert!(plan(Strategy::Equally, &users(&["a"]), 0).is_empty());
    }
}
