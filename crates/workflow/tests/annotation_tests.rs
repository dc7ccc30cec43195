//! Saving a task's annotations.

mod common;

use annolab_persistence::cancel::CancelSignal;
use annolab_persistence::model::{Annotation, AnnotationEvent, AnnotationType, TaskStatus, TaskType};
use annolab_persistence::query::SearchQuery;
use annolab_workflow::annotations::SaveAnnotationsRequest;
use annolab_workflow::error::WorkflowError;

use common::*;

async fn seed_task(ctx: &TestContext, status: TaskStatus) -> String {
    ctx.stores
        .studies
        .create(&study(PROJECT, "s-1", "1.1"))
        .await
        .unwrap();
    let task = task("s-1", "u-1", TaskType::Annotate, status);
    ctx.stores.tasks.create(&task).await.unwrap();
    task.id
}

async fn stored(ctx: &TestContext, task_id: &str, creator: &str) -> Annotation {
    let annotation = Annotation::new(AnnotationType::Tag, PROJECT, "s-1", task_id, "o-1", creator);
    ctx.stores.annotations.create(&annotation).await.unwrap();
    annotation
}

/// A new annotation as the client sends it: no id, no scope.
fn drawn(annotation_type: AnnotationType, label_id: &str) -> Annotation {
    let mut annotation = Annotation::new(annotation_type, "", "", "", "o-1", "");
    annotation.id = String::new();
    annotation.label_ids = vec![label_id.to_string()];
    annotation
}

async fn annotations_of(ctx: &TestContext, task_id: &str) -> Vec<Annotation> {
    ctx.stores
        .annotations
        .list(&SearchQuery::new().filter("task_id", task_id).sort_by("id"))
        .await
        .unwrap()
        .documents
}

#[tokio::test]
async fn test_save_creates_annotations_on_the_task() {
    let ctx = TestContext::new();
    let task_id = seed_task(&ctx, TaskStatus::Doing).await;

    let request = SaveAnnotationsRequest {
        annotations: vec![
            drawn(AnnotationType::Tag, "l-1"),
            drawn(AnnotationType::BoundingBox, "l-2"),
        ],
        comment: "checked twice".to_string(),
    };
    let report = ctx
        .services
        .annotations
        .save_for_task(&task_id, &request, "u-1", &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(report.written.indexed, 2);
    assert_eq!(report.written.errored, 0);
    let saved = annotations_of(&ctx, &task_id).await;
    assert_eq!(saved.len(), 2);
    for annotation in &saved {
        assert!(!annotation.id.is_empty());
        assert_eq!(annotation.project_id, PROJECT);
        assert_eq!(annotation.study_id, "s-1");
        assert_eq!(annotation.creator_id, "u-1");
    }
    let task = ctx.stores.tasks.get_by_id(&task_id).await.unwrap();
    assert_eq!(task.comment, "checked twice");
}

#[tokio::test]
async fn test_save_leaves_other_creators_alone() {
    let ctx = TestContext::new();
    let task_id = seed_task(&ctx, TaskStatus::Doing).await;
    let theirs = stored(&ctx, &task_id, "u-2").await;

    let mut edited = theirs.clone();
    edited.event = AnnotationEvent::Updated;
    edited.description = "overwritten".to_string();
    let mut removed = theirs.clone();
    removed.event = AnnotationEvent::Deleted;

    let report = ctx
        .services
        .annotations
        .save_for_task(
            &task_id,
            &SaveAnnotationsRequest {
                annotations: vec![edited, removed],
                comment: String::new(),
            },
            "u-1",
            &CancelSignal::never(),
        )
        .await
        .unwrap();

    assert_eq!(report.unauthorized, 2);
    assert_eq!(report.written.indexed, 0);
    assert_eq!(report.deleted, 0);
    let kept = ctx.stores.annotations.get_by_id(&theirs.id).await.unwrap();
    assert_eq!(kept.description, "");
}

#[tokio::test]
async fn test_save_updates_and_deletes_own_annotations() {
    let ctx = TestContext::new();
    let task_id = seed_task(&ctx, TaskStatus::Doing).await;
    let first = stored(&ctx, &task_id, "u-1").await;
    let second = stored(&ctx, &task_id, "u-1").await;

    let mut revised = first.clone();
    revised.event = AnnotationEvent::Updated;
    revised.description = "revised".to_string();
    let mut removed = second.clone();
    removed.event = AnnotationEvent::Deleted;
    let mut dangling = drawn(AnnotationType::Tag, "l-1");
    dangling.event = AnnotationEvent::Updated;

    let report = ctx
        .services
        .annotations
        .save_for_task(
            &task_id,
            &SaveAnnotationsRequest {
                annotations: vec![revised, removed, dangling],
                comment: String::new(),
            },
            "u-1",
            &CancelSignal::never(),
        )
        .await
        .unwrap();

    assert_eq!(report.written.indexed, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.ignored, 1);
    let saved = annotations_of(&ctx, &task_id).await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, first.id);
    assert_eq!(saved[0].description, "revised");
    assert!(saved[0].modified.is_some());
}

#[tokio::test]
async fn test_save_rejects_completed_task() {
    let ctx = TestContext::new();
    let task_id = seed_task(&ctx, TaskStatus::Completed).await;

    let err = ctx
        .services
        .annotations
        .save_for_task(
            &task_id,
            &SaveAnnotationsRequest {
                annotations: vec![drawn(AnnotationType::Tag, "l-1")],
                comment: "late".to_string(),
            },
            "u-1",
            &CancelSignal::never(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InvalidRequest { .. }));
    assert!(annotations_of(&ctx, &task_id).await.is_empty());
    let task = ctx.stores.tasks.get_by_id(&task_id).await.unwrap();
    assert_eq!(task.comment, "");
}

#[tokio::test]
async fn test_save_requires_caller() {
    let ctx = TestContext::new();
    let task_id = seed_task(&ctx, TaskStatus::Doing).await;

    let err = ctx
        .services
        .annotations
        .save_for_task(&task_id, &SaveAnnotationsRequest::default(), "", &CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InvalidRequest { .. }));
}
