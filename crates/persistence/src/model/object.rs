use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require;
use crate::store::{Document, Patch, now_ms};

wire_enum! {
    /// DICOM hierarchy level of an object.
    ObjectType {
        Study => "STUDY",
        Series => "SERIES",
        Image => "IMAGE",
    }
}

/// DICOM identifiers of an object, original and masked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub study_instance_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub series_instance_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sop_instance_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub masked_study_instance_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub masked_series_instance_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub masked_sop_instance_uid: String,
}

impl ObjectMeta {
    /// Identifiers of a study-, series- or image-level object.
    pub fn new(study: &str, series: Option<&str>, sop: Option<&str>) -> Self {
        Self {
            study_instance_uid: study.to_string(),
            series_instance_uid: series.unwrap_or_default().to_string(),
            sop_instance_uid: sop.unwrap_or_default().to_string(),
            ..Self::default()
        }
    }

    /// The level these identifiers describe, if they are consistent.
    pub fn level(&self) -> Option<ObjectType> {
        match (
            self.study_instance_uid.is_empty(),
            self.series_instance_uid.is_empty(),
            self.sop_instance_uid.is_empty(),
        ) {
            (false, true, true) => Some(ObjectType::Study),
            (false, false, true) => Some(ObjectType::Series),
            (false, false, false) => Some(ObjectType::Image),
            _ => None,
        }
    }
}

/// A study, series or image that annotations point to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: String,
    pub created: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub project_id: String,
    pub study_id: String,
    #[serde(default)]
    pub meta: ObjectMeta,
}

impl Object {
    /// A new object whose type follows from its identifiers.
    pub fn new(project_id: &str, study_id: &str, meta: ObjectMeta) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4().to_string(),
            created: now_ms(),
            object_type: meta.level()?,
            project_id: project_id.to_string(),
            study_id: study_id.to_string(),
            meta,
        })
    }
}

impl Document for Object {
    const COLLECTION: &'static str = "objects";
    type Patch = ObjectPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.project_id, "project_id")?;
        if self.meta.level() != Some(self.object_type) {
            return Err(format!(
                "meta identifiers do not describe a {} object",
                self.object_type
            ));
        }
        Ok(())
    }
}

/// Partial update of an object: only the masked identifiers change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MaskedMeta>,
}

/// Masked identifiers set after de-identification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaskedMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_study_instance_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_series_instance_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_sop_instance_uid: Option<String>,
}

impl Patch for ObjectPatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_identifiers() {
        assert_eq!(ObjectMeta::new("1", None, None).level(), Some(ObjectType::Study));
        assert_eq!(
            ObjectMeta::new("1", Some("2"), None).level(),
            Some(ObjectType::Series)
        );
        assert_eq!(
            ObjectMeta::new("1", Some("2"), Some("3")).level(),
            Some(ObjectType::Image)
        );
        assert_eq!(ObjectMeta::new("", Some("2"), None).level(), None);
    }

    #[test]
    fn test_type_must_match_meta() {
        let mut object = Object::new("p-1", "s-1", ObjectMeta::new("1", Some("2"), None)).unwrap();
        assert!(object.validate().is_ok());
        object.object_type = ObjectType::Image;
        assert!(object.validate().is_err());
    }
}
