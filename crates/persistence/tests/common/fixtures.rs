//! Document fixtures.

use annolab_persistence::model::{
    DicomTags, Project, Study, StudyStatus, Task, TaskStatus, TaskType, Workflow, LabelingType,
};

/// 2024-04-01T00:00:00Z
pub const APRIL_2024: i64 = 1_711_929_600_000;

/// A project with the given id.
pub fn project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        name: format!("Project {id}"),
        description: String::new(),
        creator_id: "owner".to_string(),
        created: APRIL_2024,
        label_group_ids: vec![],
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

/// A task created `offset_ms` after April 2024.
pub fn task(project_id: &str, study_id: &str, assignee: &str, status: TaskStatus, offset_ms: i64) -> Task {
    let mut task = Task::new(project_id, study_id, assignee, TaskType::Annotate);
    task.status = status;
    task.created = APRIL_2024 + offset_ms;
    task.modified = task.created;
    task
}
