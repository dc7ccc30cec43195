//! Label statistics and study assignees.

mod common;

use annolab_persistence::cancel::CancelSignal;
use annolab_persistence::model::{
    Annotation, AnnotationType, LabelType, ProjectPerson, ProjectRole, StudyPatch, StudyStatus,
    TaskStatus, TaskType,
};
use annolab_workflow::error::WorkflowError;

use common::*;

async fn seed_study(ctx: &TestContext, id: &str, status: StudyStatus) {
    let mut study = study(PROJECT, id, &format!("1.{id}"));
    study.status = status;
    ctx.stores.studies.create(&study).await.unwrap();
}

/// Stores a task on `study_id` with one annotation carrying `label_ids`.
async fn seed_labeled_task(
    ctx: &TestContext,
    study_id: &str,
    task_type: TaskType,
    status: TaskStatus,
    label_ids: &[&str],
) {
    let task = task(study_id, "u-1", task_type, status);
    ctx.stores.tasks.create(&task).await.unwrap();
    let mut annotation =
        Annotation::new(AnnotationType::Tag, PROJECT, study_id, task.id.as_str(), "o-1", "u-1");
    annotation.label_ids = users(label_ids);
    ctx.stores.annotations.create(&annotation).await.unwrap();
}

fn person(id: &str) -> ProjectPerson {
    ProjectPerson {
        id: id.to_string(),
        username: format!("user {id}"),
        roles: vec![ProjectRole::Annotator],
    }
}

// ============================================================================
// Label statistics
// ============================================================================

#[tokio::test]
async fn test_label_stats_counts_completed_reviews() {
    let ctx = TestContext::new();
    ctx.stores.projects.create(&project(PROJECT, &["g-1"])).await.unwrap();
    ctx.stores.label_groups.create(&label_group("g-1")).await.unwrap();
    ctx.stores
        .labels
        .create(&label("l-1", "g-1", LabelType::Impression))
        .await
        .unwrap();
    ctx.stores
        .labels
        .create(&label("l-2", "g-1", LabelType::Finding))
        .await
        .unwrap();

    seed_study(&ctx, "s-1", StudyStatus::Completed).await;
    seed_study(&ctx, "s-2", StudyStatus::Completed).await;
    seed_study(&ctx, "s-3", StudyStatus::Assigned).await;
    seed_labeled_task(&ctx, "s-1", TaskType::Review, TaskStatus::Completed, &["l-1", "l-2"]).await;
    seed_labeled_task(&ctx, "s-2", TaskType::Review, TaskStatus::Completed, &["l-1"]).await;
    // Each of these misses one filter.
    seed_labeled_task(&ctx, "s-1", TaskType::Annotate, TaskStatus::Completed, &["l-2"]).await;
    seed_labeled_task(&ctx, "s-3", TaskType::Review, TaskStatus::Completed, &["l-2"]).await;
    seed_labeled_task(&ctx, "s-2", TaskType::Review, TaskStatus::Doing, &["l-2"]).await;

    let stats = ctx
        .services
        .stats
        .label_stats(
            PROJECT,
            StudyStatus::Completed,
            TaskStatus::Completed,
            &CancelSignal::never(),
        )
        .await
        .unwrap();

    assert_eq!(stats.counts.len(), 2);
    assert_eq!(stats.counts["l-1"], 2);
    assert_eq!(stats.counts["l-2"], 1);
    let impressions: Vec<&str> = stats.labels[&LabelType::Impression]
        .iter()
        .map(|l| l.id.as_str())
        .collect();
    let findings: Vec<&str> = stats.labels[&LabelType::Finding]
        .iter()
        .map(|l| l.id.as_str())
        .collect();
    assert_eq!(impressions, vec!["l-1"]);
    assert_eq!(findings, vec!["l-2"]);
}

#[tokio::test]
async fn test_label_stats_sums_across_chunks() {
    let ctx = TestContext::new();
    ctx.stores.projects.create(&project(PROJECT, &[])).await.unwrap();

    let studies = seed_studies(&ctx.stores, 105).await;
    for id in &studies {
        ctx.stores
            .studies
            .update_with_retry(
                id,
                &StudyPatch {
                    status: Some(StudyStatus::Completed),
                    ..Default::default()
                },
                3,
            )
            .await
            .unwrap();
        seed_labeled_task(&ctx, id, TaskType::Review, TaskStatus::Completed, &["l-1"]).await;
    }

    let stats = ctx
        .services
        .stats
        .label_stats(
            PROJECT,
            StudyStatus::Completed,
            TaskStatus::Completed,
            &CancelSignal::never(),
        )
        .await
        .unwrap();

    assert_eq!(stats.counts["l-1"], 105);
    // Deleted labels are counted but not listed.
    assert!(stats.labels.is_empty());
}

#[tokio::test]
async fn test_label_stats_requires_project() {
    let ctx = TestContext::new();

    let err = ctx
        .services
        .stats
        .label_stats(
            "missing",
            StudyStatus::Completed,
            TaskStatus::Completed,
            &CancelSignal::never(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidRequest { .. }));

    let err = ctx
        .services
        .stats
        .label_stats("", StudyStatus::Completed, TaskStatus::Completed, &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidRequest { .. }));
}

// ============================================================================
// Study assignees
// ============================================================================

#[tokio::test]
async fn test_study_assignees_are_project_people_with_tasks() {
    let ctx = TestContext::new();
    let mut project = project(PROJECT, &[]);
    project.people = vec![person("u-1"), person("u-2"), person("u-3")];
    ctx.stores.projects.create(&project).await.unwrap();
    seed_study(&ctx, "s-1", StudyStatus::Assigned).await;
    seed_study(&ctx, "s-2", StudyStatus::Assigned).await;

    for (study_id, assignee) in [("s-1", "u-1"), ("s-1", "u-3"), ("s-1", "u-9"), ("s-2", "u-2")] {
        ctx.stores
            .tasks
            .create(&task(study_id, assignee, TaskType::Annotate, TaskStatus::Doing))
            .await
            .unwrap();
    }

    let assignees = ctx
        .services
        .stats
        .study_assignees("s-1", &CancelSignal::never())
        .await
        .unwrap();

    let ids: Vec<&str> = assignees.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["u-1", "u-3"]);
    assert_eq!(assignees[0].username, "user u-1");
}

#[tokio::test]
async fn test_study_assignees_of_unknown_study() {
    let ctx = TestContext::new();

    let err = ctx
        .services
        .stats
        .study_assignees("s-404", &CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InvalidRequest { .. }));
}
