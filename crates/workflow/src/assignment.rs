//! Task assignment requests.

use std::collections::BTreeMap;

use annolab_persistence::model::{StudyStatus, TaskType};
use serde::{Deserialize, Serialize};

use crate::error::{WorkflowError, WorkflowResult};

/// Where the candidate studies of an assignment come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Explicit study ids.
    Selected,
    /// `StudyInstanceUID`s, typically read from an uploaded file.
    File,
    /// A saved study search.
    Search,
}

/// How studies are spread over the assignees of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Every assignee gets every study.
    All,
    /// Round-robin over the assignees in study order.
    Equally,
}

/// Saved study search used by [`SourceType::Search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    /// Free text, ANDed with the project and status filters.
    #[serde(default)]
    pub query: String,

    /// Only studies in this status are candidates.
    #[serde(default = "default_search_status")]
    pub status: StudyStatus,

    /// Maximum number of studies, 0 for no cap.
    #[serde(default)]
    pub size: usize,
}

fn default_search_status() -> StudyStatus {
    StudyStatus::Unassigned
}

/// Request to create tasks for a set of studies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    /// Project the tasks belong to.
    pub project_id: String,

    /// Assignees per role. The role is the type of the tasks created.
    pub assignee_ids: BTreeMap<TaskType, Vec<String>>,

    /// Selects which of the three source fields is read.
    pub source_type: SourceType,

    /// Read when `source_type` is `SELECTED`.
    #[serde(default)]
    pub study_ids: Vec<String>,

    /// Read when `source_type` is `FILE`.
    #[serde(default)]
    pub study_instance_uids: Vec<String>,

    /// Read when `source_type` is `SEARCH`.
    #[serde(default)]
    pub search_query: Option<SearchSpec>,

    /// Distribution strategy, applied per role.
    pub strategy: Strategy,
}

/// The authoritative source field of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudySource<'a> {
    /// Study ids.
    Selected(&'a [String]),
    /// `StudyInstanceUID`s.
    File(&'a [String]),
    /// A saved search.
    Search(&'a SearchSpec),
}

impl AssignmentRequest {
    /// The source field selected by `source_type`.
    ///
    /// `None` only for a search request without a search.
    pub fn source(&self) -> Option<StudySource<'_>> {
        match self.source_type {
            SourceType::Selected => Some(StudySource::Selected(&self.study_ids)),
            SourceType::File => Some(StudySource::File(&self.study_instance_uids)),
            SourceType::Search => self.search_query.as_ref().map(StudySource::Search),
        }
    }

    /// Checks the request before any study is resolved.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(WorkflowError::invalid_request("project_id is required"));
        }

        if self.assignee_ids.is_empty() {
            return Err(WorkflowError::invalid_request("assignee_ids is empty"));
        }
        for (role, assignees) in &self.assignee_ids {
            if assignees.is_empty() {
                return Err(WorkflowError::invalid_request(format!(
                    "no assignee for role {}",
                    role
                )));
            }
            if assignees.iter().any(|a| a.trim().is_empty()) {
                return Err(WorkflowError::invalid_request(format!(
                    "empty assignee id for role {}",
                    role
                )));
            }
        }

        match self.source() {
            Some(StudySource::Selected(ids)) if ids.is_empty() => {
                Err(WorkflowError::invalid_request("study_ids is empty"))
            }
            Some(StudySource::File(uids)) if uids.is_empty() => {
                Err(WorkflowError::invalid_request("study_instance_uids is empty"))
            }
            Some(StudySource::Search(spec)) if spec.size == 0 && spec.query.trim().is_empty() => {
                Err(WorkflowError::invalid_request(
                    "search_query needs a size or a query",
                ))
            }
            None => Err(WorkflowError::invalid_request("search_query is missing")),
            Some(_) => Ok(()),
        }
    }
}
