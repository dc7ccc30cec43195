//! Document fixtures and seeding helpers.

use std::collections::BTreeMap;

use annolab_persistence::model::{
    AnnotationType, ChildrenSelectType, DicomTags, Label, LabelGroup, LabelScope, LabelType,
    LabelingType, Project, Study, StudyStatus, Task, TaskStatus, TaskType, Workflow,
};
use annolab_persistence::Stores;
use annolab_workflow::assignment::{AssignmentRequest, SourceType, Strategy};

/// 2024-04-01T00:00:00Z
pub const APRIL_2024: i64 = 1_711_929_600_000;

pub const PROJECT: &str = "p-1";

/// A project using the given label groups.
pub fn project(id: &str, label_group_ids: &[&str]) -> Project {
    Project {
        id: id.to_string(),
        name: format!("Project {id}"),
        description: String::new(),
        creator_id: "owner".to_string(),
        created: APRIL_2024,
        label_group_ids: label_group_ids.iter().map(|s| s.to_string()).collect(),
        people: vec![],
        workflow: Workflow::Single,
        document_link: String::new(),
        key: id.to_uppercase(),
        labeling_type: LabelingType::TwoD,
        meta: Default::default(),
        roles_mapping: Default::default(),
    }
}

/// An unassigned study with one `StudyInstanceUID`.
pub fn study(project_id: &str, id: &str, uid: &str) -> Study {
    Study {
        id: id.to_string(),
        code: format!("STD-{id}"),
        project_id: project_id.to_string(),
        creator_id: "owner".to_string(),
        status: StudyStatus::Unassigned,
        time_inserted: APRIL_2024,
        modified: APRIL_2024,
        dicom_tags: Some(DicomTags {
            study_instance_uid: vec![uid.to_string()],
            ..Default::default()
        }),
    }
}

/// A task of the given type and status.
pub fn task(study_id: &str, assignee: &str, task_type: TaskType, status: TaskStatus) -> Task {
    let mut task = Task::new(PROJECT, study_id, assignee, task_type);
    task.status = status;
    task.created = APRIL_2024;
    task.modified = APRIL_2024;
    task
}

pub fn label_group(id: &str) -> LabelGroup {
    LabelGroup {
        id: id.to_string(),
        name: format!("Group {id}"),
        color: String::new(),
        created: APRIL_2024,
        creator_id: "owner".to_string(),
        owner_ids: vec![],
    }
}

pub fn label(id: &str, group_id: &str, label_type: LabelType) -> Label {
    Label {
        id: id.to_string(),
        label_type,
        scope: LabelScope::Study,
        annotation_type: AnnotationType::Tag,
        name: format!("Label {id}"),
        short_name: String::new(),
        parent_label_id: String::new(),
        description: String::new(),
        color: "#ff0000".to_string(),
        creator_id: "owner".to_string(),
        created: APRIL_2024,
        label_group_id: group_id.to_string(),
        sub_labels: vec![],
        children_select_type: ChildrenSelectType::Unset,
        order: 0.0,
    }
}

/// Stores `count` studies `s-00`, `s-01`, ... with UIDs `1.<n>`.
pub async fn seed_studies(stores: &Stores, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let id = format!("s-{n:02}");
        stores
            .studies
            .create(&study(PROJECT, &id, &format!("1.{n}")))
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

pub fn users(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// A `SELECTED` request annotating `study_ids`.
pub fn selected(study_ids: &[String], annotators: &[&str], strategy: Strategy) -> AssignmentRequest {
    AssignmentRequest {
        project_id: PROJECT.to_string(),
        assignee_ids: BTreeMap::from([(TaskType::Annotate, users(annotators))]),
        source_type: SourceType::Selected,
        study_ids: study_ids.to_vec(),
        study_instance_uids: vec![],
        search_query: None,
        strategy,
    }
}
