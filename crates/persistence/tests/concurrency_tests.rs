//! Optimistic concurrency of read-modify-write updates.
//!
//! Both updates read the same version before either writes (see
//! [`GatedBackend`](common::GatedBackend)), so the second write always races
//! the first.

mod common;

use annolab_persistence::error::{ConcurrencyError, StorageError};
use annolab_persistence::model::{TaskPatch, TaskStatus};

use common::*;

fn comment(text: &str) -> TaskPatch {
    TaskPatch {
        comment: Some(text.to_string()),
        ..Default::default()
    }
}

fn archive() -> TaskPatch {
    TaskPatch {
        archived: Some(true),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_racing_updates_surface_a_conflict() {
    let ctx = TestContext::gated(2);
    let t = task("p-1", "s-1", "u-1", TaskStatus::New, 0);
    ctx.stores.tasks.create(&t).await.unwrap();

    let (checked, archived) = (comment("checked"), archive());
    let (first, second) = tokio::join!(
        ctx.stores.tasks.update(&t.id, &checked),
        ctx.stores.tasks.update(&t.id, &archived),
    );

    let conflicts = [&first, &second]
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(StorageError::Concurrency(ConcurrencyError::VersionConflict { .. }))
            )
        })
        .count();
    assert_eq!(conflicts, 1, "first: {first:?}, second: {second:?}");

    // Exactly one of the two fields made it, never a silent overwrite
    let read = ctx.stores.tasks.get_by_id(&t.id).await.unwrap();
    assert!((read.comment == "checked") ^ read.archived);
}

#[tokio::test]
async fn test_retry_keeps_both_updates() {
    let ctx = TestContext::gated(2);
    let t = task("p-1", "s-1", "u-1", TaskStatus::New, 0);
    ctx.stores.tasks.create(&t).await.unwrap();

    let (checked, archived) = (comment("checked"), archive());
    let (first, second) = tokio::join!(
        ctx.stores.tasks.update_with_retry(&t.id, &checked, 3),
        ctx.stores.tasks.update_with_retry(&t.id, &archived, 3),
    );
    first.unwrap();
    second.unwrap();

    let read = ctx.stores.tasks.get_by_id(&t.id).await.unwrap();
    assert_eq!(read.comment, "checked");
    assert!(read.archived);
}

#[tokio::test]
async fn test_single_attempt_reports_exhaustion() {
    let ctx = TestContext::gated(2);
    let t = task("p-1", "s-1", "u-1", TaskStatus::New, 0);
    ctx.stores.tasks.create(&t).await.unwrap();

    let (checked, archived) = (comment("checked"), archive());
    let (first, second) = tokio::join!(
        ctx.stores.tasks.update_with_retry(&t.id, &checked, 1),
        ctx.stores.tasks.update_with_retry(&t.id, &archived, 1),
    );

    let exhausted = [first, second]
        .into_iter()
        .filter(|r| {
            matches!(
                r,
                Err(StorageError::Concurrency(ConcurrencyError::RetriesExhausted { attempts: 1, .. }))
            )
        })
        .count();
    assert_eq!(exhausted, 1);
}

#[tokio::test]
async fn test_sequential_updates_never_conflict() {
    let ctx = TestContext::new();
    let t = task("p-1", "s-1", "u-1", TaskStatus::New, 0);
    ctx.stores.tasks.create(&t).await.unwrap();

    ctx.stores.tasks.update(&t.id, &comment("one")).await.unwrap();
    ctx.stores.tasks.update(&t.id, &archive()).await.unwrap();
    ctx.stores
        .tasks
        .update(&t.id, &TaskPatch::status(TaskStatus::Doing))
        .await
        .unwrap();

    let read = ctx.stores.tasks.get_by_id(&t.id).await.unwrap();
    assert_eq!(read.comment, "one");
    assert!(read.archived);
    assert_eq!(read.status, TaskStatus::Doing);
}
