use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Meta, require};
use crate::store::{Document, Patch};

wire_enum! {
    /// Role of a person in a project.
    ProjectRole {
        Annotator => "ANNOTATOR",
        Reviewer => "REVIEWER",
        ProjectOwner => "PROJECT_OWNER",
    }
}

wire_enum! {
    /// Review workflow of a project.
    Workflow {
        Single => "SINGLE",
        Triangle => "TRIANGLE",
    }
}

wire_enum! {
    /// Dimensionality of the project's labeling.
    LabelingType {
        TwoD => "2D",
        ThreeD => "3D",
    }
}

/// A member of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPerson {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub roles: Vec<ProjectRole>,
}

/// A labeling project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub creator_id: String,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<ProjectPerson>,
    pub workflow: Workflow,
    #[serde(default)]
    pub document_link: String,
    #[serde(default)]
    pub key: String,
    pub labeling_type: LabelingType,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    /// Member ids per role, derived from `people`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles_mapping: BTreeMap<ProjectRole, Vec<String>>,
}

impl Project {
    /// Recomputes `roles_mapping` from `people`.
    pub fn rebuild_roles_mapping(&mut self) {
        self.roles_mapping = roles_mapping(&self.people);
    }

    /// Ids of the members holding `role`.
    pub fn members_with(&self, role: ProjectRole) -> &[String] {
        self.roles_mapping
            .get(&role)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn roles_mapping(people: &[ProjectPerson]) -> BTreeMap<ProjectRole, Vec<String>> {
    let mut mapping: BTreeMap<ProjectRole, Vec<String>> = BTreeMap::new();
    for person in people {
        for role in &person.roles {
            mapping.entry(*role).or_default().push(person.id.clone());
        }
    }
    mapping
}

impl Document for Project {
    const COLLECTION: &'static str = "projects";
    type Patch = ProjectPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_ms(&self) -> i64 {
        self.created
    }

    fn validate(&self) -> Result<(), String> {
        require(&self.name, "name")?;
        require(&self.creator_id, "creator_id")
    }
}

/// Partial update of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_group_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    people: Option<Vec<ProjectPerson>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    roles_mapping: Option<BTreeMap<ProjectRole, Vec<String>>>,
}

impl ProjectPatch {
    /// Replaces the members, keeping `roles_mapping` in step.
    pub fn with_people(mut self, people: Vec<ProjectPerson>) -> Self {
        self.roles_mapping = Some(roles_mapping(&people));
        self.people = Some(people);
        self
    }
}

impl Patch for ProjectPatch {
    fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => require(name, "name"),
            None => Ok(()),
        }
    }
}
