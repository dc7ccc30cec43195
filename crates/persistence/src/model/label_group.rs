use serde::{Deserialize, Serialize};

use super::require;
use crate::store::{Document, Patch};

/// A named set of labels a project can use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    pub created: i64,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_ids: Vec<String>,
}

impl Document for LabelGroup {
    const COLLECTION: &'static str = "label_groups";
    type Patch = LabelGroupPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.name, "name")
    }
}

/// Partial update of a label group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelGroupPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_ids: Option<Vec<String>>,
}

impl Patch for LabelGroupPatch {
    fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => require(name, "name"),
            None => Ok(()),
        }
    }
}
