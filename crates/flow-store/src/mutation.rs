//! Higher-level operations composed from store primitives: create-under-path,
//! move/rename, acknowledge, and bounded bulk dispatch.

use std::sync::Arc;

use flow_core::{FieldMap, TaskKind, TaskState};
use sqlx::Sqlite;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::resolver::{self, Prefer, ResolveError, Resolved};
use crate::store::container::{self, NewContainer};
use crate::store::task::{self, NewTask};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("cannot ack: state is {state}")]
    CannotAcknowledge { state: &'static str },
    #[error("destination already exists and overwrite was not requested: {0}")]
    DestinationExists(String),
    #[error("parent does not exist for rename target: {0}")]
    ParentMissing(String),
    #[error("cannot move a container into its own subtree: {0}")]
    WouldCreateCycle(String),
}

pub type Result<T> = std::result::Result<T, MutationError>;

/// Resolve `parent_path` to a container and create a task under it with the
/// normal defaults (`state=open`, `priority=3`, `kind=task`).
pub async fn create_task_under_path(
    db: &Db,
    actor: Option<Uuid>,
    parent_path: &str,
    slug: String,
    title: String,
) -> Result<flow_core::Task> {
    let parent_uuid = resolver::walk_container_path(db.pool(), parent_path).await?;
    let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
    let created = task::create(
        &mut tx,
        NewTask {
            slug,
            title,
            description: None,
            project_uuid: parent_uuid,
            priority: 3,
            kind: TaskKind::Task,
            parent_task_uuid: None,
            created_by_actor: actor,
        },
    )
    .await?;
    tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
    info!(task = %created.friendly_id, parent = %parent_path, "created task");
    Ok(created)
}

/// Acknowledge outcome: counts over the input task set.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeReport {
    pub total: usize,
    pub acknowledged: usize,
    pub skipped: usize,
}

/// Acknowledge each task in `task_uuids`. Without `force`, a task must be in
/// `completed` or `cancelled` state. Tasks already acknowledged are skipped.
pub async fn acknowledge(
    db: &Db,
    actor: Option<Uuid>,
    task_uuids: &[Uuid],
    force: bool,
) -> Result<AcknowledgeReport> {
    let mut report = AcknowledgeReport { total: task_uuids.len(), ..Default::default() };

    for &uuid in task_uuids {
        let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
        let current = task::get_by_uuid(&mut *tx, uuid)
            .await?
            .ok_or(StoreError::NotFound { kind: "task", uuid: uuid.to_string() })?;

        if current.acknowledged_at.is_some() {
            report.skipped += 1;
            tx.rollback().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
            continue;
        }

        if !force && !matches!(current.state, TaskState::Completed | TaskState::Cancelled) {
            warn!(task = %uuid, state = current.state.as_str(), "acknowledge rejected: unresolved state");
            return Err(MutationError::CannotAcknowledge { state: current.state.as_str() });
        }

        let mut field_map = FieldMap::new();
        field_map.insert(
            "acknowledged_at".to_string(),
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );
        task::update_fields(&mut tx, actor, uuid, &field_map, 0).await?;
        tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
        debug!(task = %uuid, "acknowledged");
        report.acknowledged += 1;
    }

    Ok(report)
}

/// Move or rename entities per the `mv <sources...> <dst>` contract: with
/// multiple sources, `dst` must resolve to an existing container and each
/// source becomes a child of it; with one source, `dst` may instead name a
/// new slug under an existing parent (a rename).
pub async fn mv(
    db: &Db,
    actor: Option<Uuid>,
    sources: &[String],
    dst: &str,
    overwrite: bool,
) -> Result<()> {
    if sources.is_empty() {
        return Ok(());
    }
    debug!(sources = sources.len(), dst, overwrite, "mv starting");

    let dst_resolved = resolver::resolve(db.pool(), dst, None, Prefer::Container).await;

    if sources.len() > 1 {
        let Ok(Resolved::Container(dst_container)) = dst_resolved else {
            return Err(MutationError::ParentMissing(dst.to_string()));
        };
        for source in sources {
            move_one_into(db, actor, source, dst_container, overwrite).await?;
        }
        return Ok(());
    }

    let source = &sources[0];
    match dst_resolved {
        Ok(Resolved::Container(dst_container)) => {
            move_one_into(db, actor, source, dst_container, overwrite).await
        }
        _ => rename_in_place(db, actor, source, dst, overwrite).await,
    }
}

async fn move_one_into(
    db: &Db,
    actor: Option<Uuid>,
    source: &str,
    dst_container: Uuid,
    overwrite: bool,
) -> Result<()> {
    match resolver::resolve(db.pool(), source, None, Prefer::Task).await? {
        Resolved::Task(task_uuid) => {
            let current = task::get_by_uuid(db.pool(), task_uuid)
                .await?
                .ok_or(StoreError::NotFound { kind: "task", uuid: task_uuid.to_string() })?;
            maybe_remove_existing_task(db, dst_container, &current.slug, overwrite).await?;

            let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
            let mut field_map = FieldMap::new();
            field_map.insert("project_uuid".to_string(), serde_json::json!(dst_container.to_string()));
            task::update_fields(&mut tx, actor, task_uuid, &field_map, 0).await?;
            tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
            debug!(task = %task_uuid, dst_container = %dst_container, "moved task");
            Ok(())
        }
        Resolved::Container(container_uuid) => {
            if container::is_within_subtree(db.pool(), container_uuid, dst_container).await? {
                return Err(MutationError::WouldCreateCycle(source.to_string()));
            }
            let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
            let mut field_map = FieldMap::new();
            field_map.insert("parent_uuid".to_string(), serde_json::json!(dst_container.to_string()));
            container::update_fields(&mut tx, actor, container_uuid, &field_map, 0).await?;
            tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
            debug!(container = %container_uuid, dst_container = %dst_container, "moved container");
            Ok(())
        }
    }
}

async fn rename_in_place(
    db: &Db,
    actor: Option<Uuid>,
    source: &str,
    dst: &str,
    overwrite: bool,
) -> Result<()> {
    let (parent_path, new_slug) = dst
        .rsplit_once('/')
        .map(|(p, s)| (p.to_string(), s.to_string()))
        .unwrap_or_else(|| (String::new(), dst.to_string()));

    let new_slug = flow_core::normalize::normalize_slug(&new_slug)
        .map_err(|_| MutationError::ParentMissing(dst.to_string()))?;

    let dst_parent = if parent_path.is_empty() {
        None
    } else {
        Some(
            resolver::walk_container_path(db.pool(), &parent_path)
                .await
                .map_err(|_| MutationError::ParentMissing(parent_path.clone()))?,
        )
    };

    match resolver::resolve(db.pool(), source, None, Prefer::Task).await? {
        Resolved::Task(task_uuid) => {
            let project_uuid = dst_parent.ok_or(MutationError::ParentMissing(dst.to_string()))?;
            maybe_remove_existing_task(db, project_uuid, &new_slug, overwrite).await?;

            let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
            let mut field_map = FieldMap::new();
            field_map.insert("slug".to_string(), serde_json::json!(new_slug));
            field_map.insert("project_uuid".to_string(), serde_json::json!(project_uuid.to_string()));
            task::update_fields(&mut tx, actor, task_uuid, &field_map, 0).await?;
            tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
            debug!(task = %task_uuid, new_slug, "renamed task");
            Ok(())
        }
        Resolved::Container(container_uuid) => {
            if let Some(parent) = dst_parent {
                if container::is_within_subtree(db.pool(), container_uuid, parent).await? {
                    return Err(MutationError::WouldCreateCycle(source.to_string()));
                }
            }
            let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
            let mut field_map = FieldMap::new();
            field_map.insert("slug".to_string(), serde_json::json!(new_slug));
            if let Some(parent) = dst_parent {
                field_map.insert("parent_uuid".to_string(), serde_json::json!(parent.to_string()));
            }
            container::update_fields(&mut tx, actor, container_uuid, &field_map, 0).await?;
            tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
            debug!(container = %container_uuid, new_slug, "renamed container");
            Ok(())
        }
    }
}

async fn maybe_remove_existing_task(
    db: &Db,
    project_uuid: Uuid,
    slug: &str,
    overwrite: bool,
) -> Result<()> {
    let Some(existing) = task::get_by_project_slug(db.pool(), project_uuid, slug).await? else {
        return Ok(());
    };
    if !overwrite {
        return Err(MutationError::DestinationExists(slug.to_string()));
    }
    let mut tx = db.begin().await.map_err(|e| MutationError::Store(StoreError::Db(e)))?;
    let mut field_map = FieldMap::new();
    field_map.insert("state".to_string(), serde_json::json!("deleted"));
    task::update_fields(&mut tx, None, existing.uuid, &field_map, 0).await?;
    tx.commit().await.map_err(|e| MutationError::Store(StoreError::Sqlx(e)))?;
    Ok(())
}

/// Outcome of one item run through [`bulk_apply`]. An item left unrun
/// because of cancellation never appears here; its index is simply absent.
pub struct BulkOutcome<T> {
    pub index: usize,
    pub result: std::result::Result<T, String>,
}

/// Run `op` over `items` with up to `jobs` concurrent workers, each owning
/// its own transaction. `ordered` forces sequential execution and guarantees
/// the output is in input order; otherwise results may complete out of
/// order but are still returned aligned to `index`. When `continue_on_error`
/// is false, the first error short-circuits remaining work.
///
/// `cancel`, if given, is checked at transaction boundaries between items:
/// once cancelled, no further item is started, but an item already running
/// finishes its own transaction (commit or rollback) before the call
/// returns. No item is ever observed half-applied.
pub async fn bulk_apply<T, F, Fut>(
    items: Vec<String>,
    jobs: usize,
    ordered: bool,
    continue_on_error: bool,
    cancel: Option<CancellationToken>,
    op: F,
) -> Vec<BulkOutcome<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<T, String>> + Send + 'static,
{
    if ordered {
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            let result = op(item).await;
            let failed = result.is_err();
            out.push(BulkOutcome { index, result });
            if failed && !continue_on_error {
                break;
            }
        }
        return out;
    }

    let jobs = jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(jobs));
    let op = Arc::new(op);
    let mut handles = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            break;
        }
        let semaphore = Arc::clone(&semaphore);
        let op = Arc::clone(&op);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            BulkOutcome { index, result: op(item).await }
        }));
    }

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => out.push(outcome),
            Err(e) => out.push(BulkOutcome { index: usize::MAX, result: Err(e.to_string()) }),
        }
    }
    out.sort_by_key(|o| o.index);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::container::{self as container_store};
    use flow_core::ContainerKind;

    async fn seed_project(db: &Db) -> Uuid {
        let mut tx = db.begin().await.unwrap();
        let c = container_store::create(
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
        tx.commit().await.unwrap();
        c.uuid
    }

    #[tokio::test]
    async fn create_task_under_path_resolves_the_parent() {
        let db = Db::open_in_memory().await.unwrap();
        seed_project(&db).await;
        let t = create_task_under_path(&db, None, "demo", "fix-bug".to_string(), "Fix it".to_string())
            .await
            .unwrap();
        assert_eq!(t.slug, "fix-bug");
    }

    #[tokio::test]
    async fn acknowledge_without_force_requires_resolved_state() {
        let db = Db::open_in_memory().await.unwrap();
        seed_project(&db).await;
        let t = create_task_under_path(&db, None, "demo", "fix-bug".to_string(), "Fix it".to_string())
            .await
            .unwrap();
        let err = acknowledge(&db, None, &[t.uuid], false).await;
        assert!(matches!(err, Err(MutationError::CannotAcknowledge { state: "open" })));
    }

    #[tokio::test]
    async fn acknowledge_with_force_sets_timestamp() {
        let db = Db::open_in_memory().await.unwrap();
        seed_project(&db).await;
        let t = create_task_under_path(&db, None, "demo", "fix-bug".to_string(), "Fix it".to_string())
            .await
            .unwrap();
        let report = acknowledge(&db, None, &[t.uuid], true).await.unwrap();
        assert_eq!(report.acknowledged, 1);
        let updated = task::get_by_uuid(db.pool(), t.uuid).await.unwrap().unwrap();
        assert!(updated.acknowledged_at.is_some());
        assert_eq!(updated.state, TaskState::Open);
    }

    #[tokio::test]
    async fn mv_rejects_a_container_move_into_its_own_descendant() {
        let db = Db::open_in_memory().await.unwrap();
        let project = seed_project(&db).await;
        let mut tx = db.begin().await.unwrap();
        let inbox = container_store::create(
            &mut tx,
            NewContainer {
                slug: "inbox".to_string(),
                title: None,
                parent_uuid: Some(project),
                kind: ContainerKind::Area,
                created_by_actor: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let err = mv(&db, None, &["demo".to_string()], "demo/inbox", false).await;
        assert!(matches!(err, Err(MutationError::WouldCreateCycle(_))));
        let _ = inbox;
    }

    #[tokio::test]
    async fn bulk_apply_ordered_preserves_input_order() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results =
            bulk_apply(items, 2, true, true, None, |item| async move { Ok::<_, String>(item) }).await;
        let values: Vec<_> = results.into_iter().map(|o| o.result.unwrap()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn bulk_apply_stops_starting_new_items_once_cancelled() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = bulk_apply(items, 1, true, true, Some(cancel), |item| async move {
            Ok::<_, String>(item)
        })
        .await;
        assert!(results.is_empty());
    }
}
