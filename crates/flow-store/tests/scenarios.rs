//! End-to-end scenarios against a real `Db`, exercising properties that
//! cross module boundaries: optimistic concurrency, cascade delete, bundle
//! round trips, cross-database merges, acknowledge guards, and selector
//! resolution. Single-module CRUD edge cases live next to the code they
//! test; this file is for behavior that only shows up once several modules
//! cooperate.

use flow_core::{ContainerKind, FieldMap, TaskKind};
use flow_store::bundle::apply::apply_bundle;
use flow_store::bundle::writer::write_bundle;
use flow_store::bundle::ExportFilter;
use flow_store::db::Db;
use flow_store::merge::merge_project;
use flow_store::mutation::{acknowledge, MutationError};
use flow_store::resolver::{resolve, Prefer, Resolved};
use flow_store::store::container::{self, NewContainer};
use flow_store::store::task::{self, NewTask};
use flow_store::store::StoreError;
use tempfile::tempdir;

async fn new_project(db: &Db, slug: &str) -> uuid::Uuid {
    let mut tx = db.begin().await.unwrap();
    let project = container::create(
        &mut tx,
        NewContainer {
            slug: slug.to_string(),
            title: None,
            parent_uuid: None,
            kind: ContainerKind::Project,
            created_by_actor: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    project.uuid
}

async fn new_task_in(db: &Db, project_uuid: uuid::Uuid, slug: &str, title: &str) -> flow_core::Task {
    let mut tx = db.begin().await.unwrap();
    let created = task::create(
        &mut tx,
        NewTask {
            slug: slug.to_string(),
            title: title.to_string(),
            description: None,
            project_uuid,
            priority: 3,
            kind: TaskKind::Task,
            parent_task_uuid: None,
            created_by_actor: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    created
}

// --- Optimistic concurrency ---

#[tokio::test]
async fn stale_if_match_is_rejected_and_the_row_is_left_untouched() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let t = new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let mut first = FieldMap::new();
    first.insert("priority".to_string(), serde_json::json!(1));
    let mut tx = db.begin().await.unwrap();
    let outcome = task::update_fields(&mut tx, None, t.uuid, &first, t.version).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(outcome.new_version, 2);

    let mut second = FieldMap::new();
    second.insert("priority".to_string(), serde_json::json!(5));
    let mut tx = db.begin().await.unwrap();
    let err = task::update_fields(&mut tx, None, t.uuid, &second, t.version).await.unwrap_err();
    tx.commit().await.unwrap();
    assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));

    let row = task::get_by_uuid(db.pool(), t.uuid).await.unwrap().unwrap();
    assert_eq!(row.priority, 1);
}

// --- Cascade delete ---

#[tokio::test]
async fn marking_a_task_deleted_cascades_through_its_subtree() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let root = new_task_in(&db, project, "root", "Root").await;

    let mut tx = db.begin().await.unwrap();
    let mut child_params = NewTask {
        slug: "child".to_string(),
        title: "Child".to_string(),
        description: None,
        project_uuid: project,
        priority: 3,
        kind: TaskKind::Task,
        parent_task_uuid: Some(root.uuid),
        created_by_actor: None,
    };
    let child = task::create(&mut tx, child_params.clone()).await.unwrap();
    child_params.slug = "grandchild".to_string();
    child_params.parent_task_uuid = Some(child.uuid);
    let grandchild = task::create(&mut tx, child_params).await.unwrap();
    tx.commit().await.unwrap();

    let mut field_map = FieldMap::new();
    field_map.insert("state".to_string(), serde_json::json!("deleted"));
    let mut tx = db.begin().await.unwrap();
    task::update_fields(&mut tx, None, root.uuid, &field_map, 0).await.unwrap();
    tx.commit().await.unwrap();

    for uuid in [root.uuid, child.uuid, grandchild.uuid] {
        let row = task::get_by_uuid(db.pool(), uuid).await.unwrap().unwrap();
        assert_eq!(row.state, flow_core::TaskState::Deleted);
    }
}

// --- Bundle round trip and etag conflicts ---

#[tokio::test]
async fn reapplying_a_bundle_after_a_concurrent_edit_reports_an_etag_conflict() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let t = new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let dir = tempdir().unwrap();
    write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();

    let mut field_map = FieldMap::new();
    field_map.insert("title".to_string(), serde_json::json!("Fix the other bug"));
    let mut tx = db.begin().await.unwrap();
    task::update_fields(&mut tx, None, t.uuid, &field_map, 0).await.unwrap();
    tx.commit().await.unwrap();

    let report = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].reason, "etag_mismatch");
    assert_eq!(report.conflicts[0].uuid, Some(t.uuid));

    let row = task::get_by_uuid(db.pool(), t.uuid).await.unwrap().unwrap();
    assert_eq!(row.title, "Fix the other bug");
}

#[tokio::test]
async fn applying_an_unmodified_bundle_twice_produces_no_changes_and_no_conflicts() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let dir = tempdir().unwrap();
    write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();

    let first = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
    let second = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
    assert_eq!((first.created, first.updated, first.conflicts.len()), (0, 0, 0));
    assert_eq!((second.created, second.updated, second.conflicts.len()), (0, 0, 0));
}

// --- Cross-database merge ---

#[tokio::test]
async fn merging_a_project_renames_a_colliding_task_slug_instead_of_dropping_it() {
    let source = Db::open_in_memory().await.unwrap();
    let dest = Db::open_in_memory().await.unwrap();

    let source_project = new_project(&source, "demo").await;
    new_task_in(&source, source_project, "fix-bug", "Fix the bug (source)").await;

    let dest_project = new_project(&dest, "demo").await;
    new_task_in(&dest, dest_project, "fix-bug", "Fix the bug (dest)").await;

    let report = merge_project(&source, &dest, "demo", "", None, None, None, false).await.unwrap();
    assert_eq!(report.tasks_merged, 1);
    assert_eq!(report.renames.len(), 1);
    assert_eq!(report.renames[0].from_slug, "fix-bug");
    assert_eq!(report.renames[0].to_slug, "fix-bug--dup-2");

    let merged = task::get_by_project_slug(dest.pool(), dest_project, "fix-bug--dup-2")
        .await
        .unwrap()
        .expect("renamed task present in destination");
    assert_eq!(merged.title, "Fix the bug (source)");

    let original = task::get_by_project_slug(dest.pool(), dest_project, "fix-bug").await.unwrap().unwrap();
    assert_eq!(original.title, "Fix the bug (dest)");
}

// --- Acknowledge guard ---

#[tokio::test]
async fn acknowledging_an_unresolved_task_without_force_is_rejected() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let t = new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let err = acknowledge(&db, None, &[t.uuid], false).await.unwrap_err();
    assert!(matches!(err, MutationError::CannotAcknowledge { .. }));

    let row = task::get_by_uuid(db.pool(), t.uuid).await.unwrap().unwrap();
    assert!(row.acknowledged_at.is_none());
}

#[tokio::test]
async fn acknowledging_an_unresolved_task_with_force_succeeds_and_is_idempotent() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let t = new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let report = acknowledge(&db, None, &[t.uuid], true).await.unwrap();
    assert_eq!((report.total, report.acknowledged, report.skipped), (1, 1, 0));

    let report = acknowledge(&db, None, &[t.uuid], true).await.unwrap();
    assert_eq!((report.total, report.acknowledged, report.skipped), (1, 0, 1));
}

// --- Selector resolution ---

#[tokio::test]
async fn a_typed_prefix_selector_resolves_to_the_matching_kind_even_on_a_shared_path() {
    let db = Db::open_in_memory().await.unwrap();
    let mut tx = db.begin().await.unwrap();
    let project = container::create(
        &mut tx,
        NewContainer {
            slug: "demo".to_string(),
            title: None,
            parent_uuid: None,
            kind: ContainerKind::Project,
            created_by_actor: None,
        },
    )
    .await
    .unwrap();
    let inbox = container::create(
        &mut tx,
        NewContainer {
            slug: "inbox".to_string(),
            title: None,
            parent_uuid: Some(project.uuid),
            kind: ContainerKind::Area,
            created_by_actor: None,
        },
    )
    .await
    .unwrap();
    task::create(
        &mut tx,
        NewTask {
            slug: "inbox".to_string(),
            title: "Also named inbox".to_string(),
            description: None,
            project_uuid: project.uuid,
            priority: 3,
            kind: TaskKind::Task,
            parent_task_uuid: None,
            created_by_actor: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let resolved = resolve(db.pool(), "c:demo/inbox", None, Prefer::Task).await.unwrap();
    assert_eq!(resolved, Resolved::Container(inbox.uuid));

    let resolved = resolve(db.pool(), "t:demo/inbox", None, Prefer::Container).await.unwrap();
    assert_eq!(resolved, Resolved::Task(resolved_task_uuid(&db, project.uuid).await));

    async fn resolved_task_uuid(db: &Db, project_uuid: uuid::Uuid) -> uuid::Uuid {
        task::get_by_project_slug(db.pool(), project_uuid, "inbox").await.unwrap().unwrap().uuid
    }
}

#[tokio::test]
async fn a_bare_friendly_id_resolves_without_any_path_context() {
    let db = Db::open_in_memory().await.unwrap();
    let project = new_project(&db, "demo").await;
    let t = new_task_in(&db, project, "fix-bug", "Fix the bug").await;

    let resolved = resolve(db.pool(), &t.friendly_id, None, Prefer::Task).await.unwrap();
    assert_eq!(resolved, Resolved::Task(t.uuid));
}
