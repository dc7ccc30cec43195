use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require;
use crate::store::{Document, Patch, now_ms};

wire_enum! {
    /// What the assignee does with the study. Doubles as the assignment role key.
    TaskType {
        Annotate => "ANNOTATE",
        Review => "REVIEW",
    }
}

wire_enum! {
    /// Progress of a task.
    TaskStatus {
        New => "NEW",
        Doing => "DOING",
        Completed => "COMPLETED",
    }
}

/// A unit of work: one assignee, one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Human-readable code, `TSK-<n>`.
    #[serde(default)]
    pub code: String,
    pub project_id: String,
    pub study_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub study_code: String,
    pub assignee_id: String,
    #[serde(default)]
    pub creator_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub comment: String,
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
}

impl Task {
    /// A fresh `NEW` task without a code.
    pub fn new(
        project_id: impl Into<String>,
        study_id: impl Into<String>,
        assignee_id: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            code: String::new(),
            project_id: project_id.into(),
            study_id: study_id.into(),
            study_code: String::new(),
            assignee_id: assignee_id.into(),
            creator_id: String::new(),
            task_type,
            status: TaskStatus::New,
            archived: false,
            comment: String::new(),
            created: now,
            modified: now,
        }
    }
}

impl Document for Task {
    const COLLECTION: &'static str = "tasks";
    type Patch = TaskPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.project_id, "project_id")?;
        require(&self.study_id, "study_id")?;
        require(&self.assignee_id, "assignee_id")
    }
}

/// Partial update of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

impl TaskPatch {
    /// Sets only the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl Patch for TaskPatch {
    fn validate(&self) -> Result<(), String> {
        match &self.assignee_id {
            Some(assignee) => require(assignee, "assignee_id"),
            None => Ok(()),
        }
    }
}
