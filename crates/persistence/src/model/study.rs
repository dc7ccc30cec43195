use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::require;
use crate::store::{Document, Patch};

wire_enum! {
    /// Study status, derived from the statuses of its tasks.
    StudyStatus {
        Unassigned => "UNASSIGNED",
        Assigned => "ASSIGNED",
        Completed => "COMPLETED",
    }
}

/// DICOM attributes of a study, as multi-valued strings.
///
/// Only the identifiers the workflow reads are named; every other tag is kept
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DicomTags {
    #[serde(
        rename = "StudyInstanceUID",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub study_instance_uid: Vec<String>,
    #[serde(
        rename = "SeriesInstanceUID",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub series_instance_uid: Vec<String>,
    #[serde(rename = "SOPInstanceUID", default, skip_serializing_if = "Vec::is_empty")]
    pub sop_instance_uid: Vec<String>,
    #[serde(rename = "PatientID", default, skip_serializing_if = "Vec::is_empty")]
    pub patient_id: Vec<String>,
    #[serde(rename = "Modality", default, skip_serializing_if = "Vec::is_empty")]
    pub modality: Vec<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl DicomTags {
    /// The first `StudyInstanceUID`, if any.
    pub fn study_uid(&self) -> Option<&str> {
        self.study_instance_uid.first().map(String::as_str)
    }
}

/// An imaging study registered in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    #[serde(default)]
    pub code: String,
    pub project_id: String,
    #[serde(default)]
    pub creator_id: String,
    pub status: StudyStatus,
    /// Registration time, used for shard placement.
    pub time_inserted: i64,
    #[serde(default)]
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dicom_tags: Option<DicomTags>,
}

impl Study {
    /// The study's `StudyInstanceUID`, if it has DICOM tags.
    pub fn study_uid(&self) -> Option<&str> {
        self.dicom_tags.as_ref().and_then(DicomTags::study_uid)
    }
}

impl Document for Study {
    const COLLECTION: &'static str = "studies";
    type Patch = StudyPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.time_inserted
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.project_id, "project_id")
    }
}

/// Partial update of a study.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dicom_tags: Option<DicomTags>,
}

impl StudyPatch {
    /// Sets only the status.
    pub fn status(status: StudyStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl Patch for StudyPatch {
    fn validate(&self) -> Result<(), String> {
        match &self.code {
            Some(code) => require(code, "code"),
            None => Ok(()),
        }
    }
}
