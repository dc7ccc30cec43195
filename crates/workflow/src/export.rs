//! Label export.
//!
//! An export is a tagged JSON snapshot of a project's labels and the
//! annotations of its completed reviews, written to the blob store under
//! `<tag>.json`. The export document is created `PENDING` and marked `DONE`
//! once the blob is stored. A failure in between removes the pending document
//! so the tag can be used again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use annolab_persistence::model::{
    Annotation, ExportStatus, Label, LabelExport, LabelExportPatch, LabelGroup, LabelType, Object,
    ObjectType, Project, StudyStatus, Task, TaskStatus, TaskType,
};
use annolab_persistence::{CancelSignal, SearchQuery, StorageError, Stores};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::BlobStore;
use crate::error::{WorkflowError, WorkflowResult};

/// Page size of the export scans, and the number of task ids per
/// annotation query.
pub const EXPORT_PAGE_SIZE: u64 = 100;

const UPDATE_ATTEMPTS: u32 = 3;

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Project to export.
    pub project_id: String,
    /// Unique name of the export.
    pub tag: String,
    /// Keep only annotations carrying one of these labels. Empty keeps all.
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// A study in the payload, keyed by its study-level object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedStudy {
    /// Study-level object.
    pub object_id: String,
    /// Human-readable study code.
    pub code: String,
    /// Study status at export time.
    pub status: StudyStatus,
}

/// A reviewer comment in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedComment {
    /// Id of the review task.
    pub id: String,
    /// Study-level object of the task's study.
    pub object_id: String,
    /// Reviewer.
    pub creator_id: String,
    /// Comment text.
    pub content: String,
}

/// The stored blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ExportPayload {
    pub label_groups: Vec<LabelGroup>,
    pub labels: Vec<Label>,
    /// Annotations carrying an impression label.
    pub impression: Vec<Annotation>,
    /// Annotations carrying a finding label.
    pub finding: Vec<Annotation>,
    pub objects: Vec<Object>,
    pub studies: Vec<ExportedStudy>,
    pub comments: Vec<ExportedComment>,
    /// Study-level objects of studies with an archived task.
    pub archives: Vec<String>,
}

/// Builds and stores label exports.
#[derive(Debug, Clone)]
pub struct ExportService {
    stores: Stores,
    blobs: Arc<dyn BlobStore>,
}

impl ExportService {
    /// Creates the service.
    pub fn new(stores: Stores, blobs: Arc<dyn BlobStore>) -> Self {
        Self { stores, blobs }
    }

    /// Creates an export of `request.project_id` and returns it `DONE`.
    pub async fn create_export(
        &self,
        request: &ExportRequest,
        creator_id: &str,
        cancel: &CancelSignal,
    ) -> WorkflowResult<LabelExport> {
        let tag = request.tag.trim();
        if tag.is_empty() {
            return Err(WorkflowError::invalid_request("tag is required"));
        }
        if request.project_id.is_empty() {
            return Err(WorkflowError::invalid_request("project_id is required"));
        }

        // Two concurrent requests with the same tag can both pass this check
        let taken = self
            .stores
            .label_exports
            .count(&SearchQuery::new().filter("tag", tag))
            .await?;
        if taken > 0 {
            return Err(WorkflowError::invalid_request(format!(
                "export tag {:?} already exists",
                tag
            )));
        }

        let Some(project) = self
            .stores
            .projects
            .find(&SearchQuery::by_id(request.project_id.as_str()))
            .await?
        else {
            return Err(WorkflowError::invalid_request(format!(
                "project {} not found",
                request.project_id
            )));
        };

        let mut export = LabelExport::new(
            project.id.as_str(),
            tag,
            creator_id,
            request.label_ids.clone(),
        );
        self.stores.label_exports.create(&export).await?;
        debug!(export_id = %export.id, tag = %tag, "Created pending export");

        let written = self
            .write_payload(&project, &export, &request.label_ids, cancel)
            .await;
        let (payload, size) = match written {
            Ok(written) => written,
            Err(e) => {
                // Frees the tag for a retry
                if let Err(cleanup) = self
                    .stores
                    .label_exports
                    .delete(&SearchQuery::by_id(export.id.as_str()))
                    .await
                {
                    warn!(export_id = %export.id, error = %cleanup, "Failed to remove pending export");
                }
                return Err(e);
            }
        };

        let done = LabelExportPatch {
            status: Some(ExportStatus::Done),
        };
        self.stores
            .label_exports
            .update_with_retry(&export.id, &done, UPDATE_ATTEMPTS)
            .await?;
        export.status = ExportStatus::Done;

        info!(
            export_id = %export.id,
            project_id = %project.id,
            tag = %export.tag,
            impression = payload.impression.len(),
            finding = payload.finding.len(),
            bytes = size,
            "Stored label export"
        );
        Ok(export)
    }

    /// Gathers the payload and stores it under the export's file path.
    /// Returns the payload and its size in bytes.
    async fn write_payload(
        &self,
        project: &Project,
        export: &LabelExport,
        label_ids: &[String],
        cancel: &CancelSignal,
    ) -> WorkflowResult<(ExportPayload, usize)> {
        let payload = self.gather(project, label_ids, cancel).await?;
        let bytes = serde_json::to_vec(&payload).map_err(StorageError::from)?;
        let size = bytes.len();
        self.blobs.store(&export.file_path, bytes).await?;
        Ok((payload, size))
    }

    /// Collects the payload of `project`.
    pub async fn gather(
        &self,
        project: &Project,
        label_ids: &[String],
        cancel: &CancelSignal,
    ) -> WorkflowResult<ExportPayload> {
        let mut payload = ExportPayload::default();
        let project_id = project.id.as_str();
        let group_ids = project.label_group_ids.iter().map(String::as_str);

        if !project.label_group_ids.is_empty() {
            payload.label_groups = self
                .stores
                .label_groups
                .scan_all(
                    &SearchQuery::new().filter_any("_id", group_ids.clone()).sort_by("id"),
                    EXPORT_PAGE_SIZE,
                    cancel,
                )
                .await?;
            payload.labels = self
                .stores
                .labels
                .scan_all(
                    &SearchQuery::new().filter_any("label_group_id", group_ids).sort_by("id"),
                    EXPORT_PAGE_SIZE,
                    cancel,
                )
                .await?;
        }

        let label_types: BTreeMap<&str, LabelType> = payload
            .labels
            .iter()
            .map(|l| (l.id.as_str(), l.label_type))
            .collect();

        let reviews = self
            .stores
            .tasks
            .scan_all(
                &SearchQuery::new()
                    .filter("project_id", project_id)
                    .filter("type", TaskType::Review.as_str())
                    .filter("status", TaskStatus::Completed.as_str())
                    .sort_by("id"),
                EXPORT_PAGE_SIZE,
                cancel,
            )
            .await?;

        let mut impression = BTreeMap::new();
        let mut finding = BTreeMap::new();
        let review_ids: Vec<&str> = reviews.iter().map(|t| t.id.as_str()).collect();
        for chunk in review_ids.chunks(EXPORT_PAGE_SIZE as usize) {
            let mut query = SearchQuery::new()
                .filter_any("task_id", chunk.iter().copied())
                .sort_by("id");
            if !label_ids.is_empty() {
                query = query.filter_any("label_ids", label_ids.iter().map(String::as_str));
            }
            let annotations = self
                .stores
                .annotations
                .scan_all(&query, EXPORT_PAGE_SIZE, cancel)
                .await?;

            for annotation in annotations {
                for label_id in &annotation.label_ids {
                    match label_types.get(label_id.as_str()) {
                        Some(LabelType::Impression) => {
                            impression.insert(annotation.id.clone(), annotation.clone());
                        }
                        Some(LabelType::Finding) => {
                            finding.insert(annotation.id.clone(), annotation.clone());
                        }
                        None => {}
                    }
                }
            }
        }
        payload.impression = impression.into_values().collect();
        payload.finding = finding.into_values().collect();

        let studies: BTreeMap<String, _> = self
            .stores
            .studies
            .scan_all(
                &SearchQuery::new().filter("project_id", project_id).sort_by("id"),
                EXPORT_PAGE_SIZE,
                cancel,
            )
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        payload.objects = self
            .stores
            .objects
            .scan_all(
                &SearchQuery::new().filter("project_id", project_id).sort_by("id"),
                EXPORT_PAGE_SIZE,
                cancel,
            )
            .await?;

        let study_objects: BTreeMap<&str, &str> = payload
            .objects
            .iter()
            .filter(|o| o.object_type == ObjectType::Study)
            .map(|o| (o.study_id.as_str(), o.id.as_str()))
            .collect();

        payload.studies = payload
            .objects
            .iter()
            .filter(|o| o.object_type == ObjectType::Study)
            .filter_map(|o| {
                studies.get(&o.study_id).map(|s| ExportedStudy {
                    object_id: o.id.clone(),
                    code: s.code.clone(),
                    status: s.status,
                })
            })
            .collect();

        payload.comments = reviews
            .iter()
            .filter(|t| !t.comment.is_empty())
            .filter_map(|t| {
                study_objects.get(t.study_id.as_str()).map(|object_id| ExportedComment {
                    id: t.id.clone(),
                    object_id: object_id.to_string(),
                    creator_id: t.assignee_id.clone(),
                    content: t.comment.clone(),
                })
            })
            .collect();

        let archived: Vec<Task> = self
            .stores
            .tasks
            .scan_all(
                &SearchQuery::new()
                    .filter("project_id", project_id)
                    .filter("archived", "true")
                    .sort_by("id"),
                EXPORT_PAGE_SIZE,
                cancel,
            )
            .await?;
        payload.archives = archived
            .iter()
            .filter_map(|t| study_objects.get(t.study_id.as_str()).map(|id| id.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(payload)
    }
}
