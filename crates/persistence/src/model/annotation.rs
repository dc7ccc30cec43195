use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Meta, require};
use crate::store::{Document, Patch, now_ms};

wire_enum! {
    /// Geometry kind of an annotation. Annotations are sharded by it.
    AnnotationType {
        Tag => "TAG",
        BoundingBox => "BOUNDING_BOX",
        Polygon => "POLYGON",
        Mask => "MASK",
        BoundingBox3d => "BOUNDING_BOX_3D",
    }
}

wire_enum! {
    /// Last lifecycle event of an annotation.
    AnnotationEvent {
        Created => "CREATED",
        Updated => "UPDATED",
        Deleted => "DELETED",
    }
}

/// A structured annotation of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub object_id: String,
    pub project_id: String,
    pub creator_id: String,
    /// Display name of the creator, filled at read time.
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub description: String,
    /// Geometry. Shape depends on the type.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    pub event: AnnotationEvent,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub task_id: String,
    pub study_id: String,
}

impl Annotation {
    /// A fresh annotation in the `CREATED` state.
    pub fn new(
        annotation_type: AnnotationType,
        project_id: impl Into<String>,
        study_id: impl Into<String>,
        task_id: impl Into<String>,
        object_id: impl Into<String>,
        creator_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            object_id: object_id.into(),
            project_id: project_id.into(),
            creator_id: creator_id.into(),
            creator_name: String::new(),
            description: String::new(),
            data: Value::Null,
            annotation_type,
            event: AnnotationEvent::Created,
            created: now_ms(),
            modified: None,
            meta: Meta::new(),
            label_ids: Vec::new(),
            task_id: task_id.into(),
            study_id: study_id.into(),
        }
    }
}

fn points(data: &Value, dims: &[&str]) -> Option<usize> {
    let items = data.as_array()?;
    items
        .iter()
        .all(|p| dims.iter().all(|d| p.get(d).is_some_and(Value::is_number)))
        .then_some(items.len())
}

fn validate_data(annotation_type: AnnotationType, data: &Value) -> Result<(), String> {
    let ok = match annotation_type {
        AnnotationType::Tag => data.is_null(),
        AnnotationType::BoundingBox => points(data, &["x", "y"]) == Some(2),
        AnnotationType::Polygon => points(data, &["x", "y"]).is_some_and(|n| n >= 3),
        AnnotationType::BoundingBox3d => points(data, &["x", "y", "z"]) == Some(2),
        AnnotationType::Mask => match data {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        },
    };
    if ok {
        Ok(())
    } else {
        Err(format!("invalid data for {} annotation", annotation_type))
    }
}

impl Document for Annotation {
    const COLLECTION: &'static str = "annotations";
    type Patch = AnnotationPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn discriminator(&self) -> Option<&str> {
        Some(self.annotation_type.as_str())
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.creator_id, "creator_id")?;
        require(&self.project_id, "project_id")?;
        require(&self.study_id, "study_id")?;
        require(&self.task_id, "task_id")?;
        validate_data(self.annotation_type, &self.data)
    }
}

/// Partial update of an annotation.
///
/// New geometry is checked against the annotation's type with
/// [`AnnotationPatch::for_type`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<AnnotationEvent>,
    #[serde(skip)]
    geometry_type: Option<AnnotationType>,
}

impl AnnotationPatch {
    /// An `UPDATED` patch whose data is validated as `annotation_type`.
    pub fn for_type(annotation_type: AnnotationType) -> Self {
        Self {
            event: Some(AnnotationEvent::Updated),
            geometry_type: Some(annotation_type),
            ..Self::default()
        }
    }
}

impl Patch for AnnotationPatch {
    fn validate(&self) -> Result<(), String> {
        match (&self.data, self.geometry_type) {
            (Some(data), Some(annotation_type)) => validate_data(annotation_type, data),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annotation(annotation_type: AnnotationType, data: Value) -> Annotation {
        let mut a = Annotation::new(annotation_type, "p-1", "s-1", "t-1", "o-1", "u-1");
        a.data = data;
        a
    }

    #[test]
    fn test_geometry_rules() {
        let box2 = json!([{ "x": 0, "y": 0 }, { "x": 4.5, "y": 3 }]);
        assert!(annotation(AnnotationType::BoundingBox, box2.clone()).validate().is_ok());
        assert!(annotation(AnnotationType::Polygon, box2.clone()).validate().is_err());
        assert!(annotation(AnnotationType::BoundingBox3d, box2).validate().is_err());

        let box3d = json!([{ "x": 0, "y": 0, "z": 0 }, { "x": 1, "y": 1, "z": 1 }]);
        assert!(annotation(AnnotationType::BoundingBox3d, box3d).validate().is_ok());

        assert!(annotation(AnnotationType::Tag, Value::Null).validate().is_ok());
        assert!(annotation(AnnotationType::Tag, json!([])).validate().is_err());
        assert!(annotation(AnnotationType::Mask, json!("")).validate().is_err());
        assert!(annotation(AnnotationType::Mask, json!("rle:12")).validate().is_ok());
    }

    #[test]
    fn test_sharded_by_type() {
        let a = annotation(AnnotationType::BoundingBox3d, Value::Null);
        assert_eq!(a.discriminator(), Some("BOUNDING_BOX_3D"));
    }

    #[test]
    fn test_patch_geometry_is_checked() {
        let mut patch = AnnotationPatch::for_type(AnnotationType::Polygon);
        patch.data = Some(json!([{ "x": 1, "y": 1 }]));
        assert!(patch.validate().is_err());

        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["event"], "UPDATED");
        assert!(value.get("geometry_type").is_none());
    }
}
