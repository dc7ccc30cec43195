use serde::{Deserialize, Serialize};

use super::{AnnotationType, require};
use crate::store::{Document, Patch};

wire_enum! {
    /// Label category.
    LabelType {
        Impression => "IMPRESSION",
        Finding => "FINDING",
    }
}

wire_enum! {
    /// Level of the object a label applies to.
    LabelScope {
        Study => "STUDY",
        Series => "SERIES",
        Image => "IMAGE",
    }
}

wire_enum! {
    /// How sub-labels are selected. `Unset` is stored as the empty string.
    ChildrenSelectType {
        Unset => "",
        Radio => "RADIO",
        Checkbox => "CHECKBOX",
    }
}

impl Default for ChildrenSelectType {
    fn default() -> Self {
        ChildrenSelectType::Unset
    }
}

/// A label annotators attach to annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    #[serde(rename = "type")]
    pub label_type: LabelType,
    pub scope: LabelScope,
    pub annotation_type: AnnotationType,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub parent_label_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub color: String,
    pub creator_id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_group_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_labels: Vec<Label>,
    #[serde(default)]
    pub children_select_type: ChildrenSelectType,
    #[serde(default)]
    pub order: f32,
}

impl Document for Label {
    const COLLECTION: &'static str = "labels";
    type Patch = LabelPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.name, "name")?;
        require(&self.creator_id, "creator_id")?;
        require(&self.label_group_id, "label_group_id")?;
        require(&self.color, "color")
    }
}

/// Partial update of a label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_label_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_select_type: Option<ChildrenSelectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<f32>,
}

impl Patch for LabelPatch {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            require(name, "name")?;
        }
        if let Some(color) = &self.color {
            require(color, "color")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_children_select_type() {
        let label: Label = serde_json::from_value(json!({
            "id": "l-1",
            "type": "FINDING",
            "scope": "IMAGE",
            "annotation_type": "POLYGON",
            "name": "Nodule",
            "color": "#ff0000",
            "creator_id": "u-1",
            "label_group_id": "g-1",
            "children_select_type": ""
        }))
        .unwrap();

        assert_eq!(label.children_select_type, ChildrenSelectType::Unset);
        assert!(label.validate().is_ok());
    }

    #[test]
    fn test_patch_rejects_blank_name() {
        let patch = LabelPatch {
            name: Some(" ".into()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }
}
