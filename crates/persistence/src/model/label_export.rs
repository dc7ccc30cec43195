use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require;
use crate::store::{Document, Patch, now_ms};

wire_enum! {
    /// Progress of an export.
    ExportStatus {
        Pending => "PENDING",
        Done => "DONE",
    }
}

/// A tagged snapshot of a project's labels and reviewed annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelExport {
    pub id: String,
    pub created: i64,
    /// Blob key of the payload, `<tag>.json`.
    pub file_path: String,
    pub creator_id: String,
    pub project_id: String,
    pub tag: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub status: ExportStatus,
}

impl LabelExport {
    /// A `PENDING` export stored under `<tag>.json`.
    pub fn new(
        project_id: impl Into<String>,
        tag: impl Into<String>,
        creator_id: impl Into<String>,
        label_ids: Vec<String>,
    ) -> Self {
        let tag = tag.into();
        Self {
            id: Uuid::new_v4().to_string(),
            created: now_ms(),
            file_path: format!("{}.json", tag),
            creator_id: creator_id.into(),
            project_id: project_id.into(),
            tag,
            label_ids,
            status: ExportStatus::Pending,
        }
    }
}

impl Document for LabelExport {
    const COLLECTION: &'static str = "label_exports";
    type Patch = LabelExportPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.tag, "tag")?;
        require(&self.project_id, "project_id")
    }
}

/// Partial update of an export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelExportPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExportStatus>,
}

impl Patch for LabelExportPatch {}
