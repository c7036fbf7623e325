//! Turn a user-supplied selector string into a concrete entity.
//!
//! Accepted forms, tried in order: typed prefix (`t:`/`c:`), bare friendly
//! ID, bare UUID, `/`-delimited path.

use flow_core::normalize::split_path;
use sqlx::Sqlite;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{container, task};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error("not found: {selector}")]
    NotFound { selector: String },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// What a selector ultimately names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Container(Uuid),
    Task(Uuid),
}

/// Which kind ambiguity should prefer when a selector could name either a
/// container or a task at the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefer {
    Container,
    Task,
}

fn is_friendly_id(s: &str) -> bool {
    let Some((prefix, digits)) = s.split_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_uppercase())
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36 && s.matches('-').count() == 4 && Uuid::parse_str(s).is_ok()
}

/// Rewrite a path-style selector to be relative to `project_root`, unless it
/// already starts with that prefix. Friendly IDs and UUIDs are never
/// rewritten; callers only invoke this for the path branch.
fn apply_project_root(selector: &str, project_root: Option<&str>) -> String {
    let Some(root) = project_root.filter(|r| !r.is_empty()) else {
        return selector.to_string();
    };
    if selector == root || selector.starts_with(&format!("{root}/")) {
        selector.to_string()
    } else {
        flow_core::normalize::join_path(root, selector)
    }
}

/// Resolve `selector` against `pool`, preferring `prefer` on path-based
/// ambiguity between a container and a task with the same terminal slug.
pub async fn resolve(
    pool: &sqlx::Pool<Sqlite>,
    selector: &str,
    project_root: Option<&str>,
    prefer: Prefer,
) -> Result<Resolved> {
    if let Some(rest) = selector.strip_prefix("t:") {
        let rewritten = apply_project_root(rest, project_root);
        return resolve_task_path(pool, &rewritten).await;
    }
    if let Some(rest) = selector.strip_prefix("c:") {
        let rewritten = apply_project_root(rest, project_root);
        return resolve_container_path(pool, &rewritten).await;
    }

    if is_friendly_id(selector) {
        if let Some(t) = task::get_by_friendly_id(pool, selector).await? {
            return Ok(Resolved::Task(t.uuid));
        }
        if let Some(c) = container::get_by_friendly_id(pool, selector).await? {
            return Ok(Resolved::Container(c.uuid));
        }
        return Err(ResolveError::NotFound { selector: selector.to_string() });
    }

    if is_uuid(selector) {
        let uuid = Uuid::parse_str(selector).expect("validated by is_uuid");
        if let Some(t) = task::get_by_uuid(pool, uuid).await? {
            return Ok(Resolved::Task(t.uuid));
        }
        if container::get_by_uuid(pool, uuid).await?.is_some() {
            return Ok(Resolved::Container(uuid));
        }
        return Err(ResolveError::NotFound { selector: selector.to_string() });
    }

    let rewritten = apply_project_root(selector, project_root);
    match prefer {
        Prefer::Container => match resolve_container_path(pool, &rewritten).await {
            Ok(resolved) => Ok(resolved),
            Err(_) => resolve_task_path(pool, &rewritten).await,
        },
        Prefer::Task => match resolve_task_path(pool, &rewritten).await {
            Ok(resolved) => Ok(resolved),
            Err(_) => resolve_container_path(pool, &rewritten).await,
        },
    }
}

/// Walk `path` segment by segment through containers, returning the
/// container UUID at the end. Every segment must resolve.
pub async fn walk_container_path(pool: &sqlx::Pool<Sqlite>, path: &str) -> Result<Uuid> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(ResolveError::NotFound { selector: path.to_string() });
    }
    let mut parent: Option<Uuid> = None;
    let mut current = None;
    for segment in &segments {
        let found = container::get_by_parent_slug(pool, parent, segment).await?;
        let Some(found) = found else {
            return Err(ResolveError::NotFound { selector: path.to_string() });
        };
        parent = Some(found.uuid);
        current = Some(found.uuid);
    }
    current.ok_or(ResolveError::NotFound { selector: path.to_string() })
}

async fn resolve_container_path(pool: &sqlx::Pool<Sqlite>, path: &str) -> Result<Resolved> {
    walk_container_path(pool, path).await.map(Resolved::Container)
}

/// Walk `path` to find a task: every segment but the last must resolve to a
/// container; the last segment is the task's slug under that container.
async fn resolve_task_path(pool: &sqlx::Pool<Sqlite>, path: &str) -> Result<Resolved> {
    let segments = split_path(path);
    let Some((task_slug, parent_segments)) = segments.split_last() else {
        return Err(ResolveError::NotFound { selector: path.to_string() });
    };

    let mut parent: Option<Uuid> = None;
    for segment in parent_segments {
        let found = container::get_by_parent_slug(pool, parent, segment).await?;
        let Some(found) = found else {
            return Err(ResolveError::NotFound { selector: path.to_string() });
        };
        parent = Some(found.uuid);
    }

    let Some(project_uuid) = parent else {
        return Err(ResolveError::NotFound { selector: path.to_string() });
    };

    match task::get_by_project_slug(pool, project_uuid, task_slug).await? {
        Some(t) => Ok(Resolved::Task(t.uuid)),
        None => Err(ResolveError::NotFound { selector: path.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::store::container::{self as container_store, NewContainer};
    use crate::store::task::{self as task_store, NewTask};
    use flow_core::{ContainerKind, TaskKind};

    async fn seed(db: &Db) -> (Uuid, Uuid) {
        let mut tx = db.begin().await.unwrap();
        let root = container_store::create(
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
        let inbox = container_store::create(
            &mut tx,
            NewContainer {
                slug: "inbox".to_string(),
                title: None,
                parent_uuid: Some(root.uuid),
                kind: ContainerKind::Feature,
                created_by_actor: None,
            },
        )
        .await
        .unwrap();
        let t = task_store::create(
            &mut tx,
            NewTask {
                slug: "fix-bug".to_string(),
                title: "Fix the bug".to_string(),
                description: None,
                project_uuid: inbox.uuid,
                priority: 3,
                kind: TaskKind::Task,
                parent_task_uuid: None,
                created_by_actor: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        (inbox.uuid, t.uuid)
    }

    #[tokio::test]
    async fn resolves_task_by_full_path() {
        let db = Db::open_in_memory().await.unwrap();
        let (_, task_uuid) = seed(&db).await;
        let resolved = resolve(db.pool(), "demo/inbox/fix-bug", None, Prefer::Task)
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Task(task_uuid));
    }

    #[tokio::test]
    async fn project_root_rewrites_bare_selector() {
        let db = Db::open_in_memory().await.unwrap();
        let (_, task_uuid) = seed(&db).await;
        let resolved = resolve(db.pool(), "inbox/fix-bug", Some("demo"), Prefer::Task)
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Task(task_uuid));
    }

    #[tokio::test]
    async fn typed_prefix_forces_task_resolution() {
        let db = Db::open_in_memory().await.unwrap();
        let (_, task_uuid) = seed(&db).await;
        let resolved = resolve(db.pool(), "t:inbox/fix-bug", Some("demo"), Prefer::Container)
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Task(task_uuid));
    }

    #[tokio::test]
    async fn unresolvable_selector_is_not_found() {
        let db = Db::open_in_memory().await.unwrap();
        seed(&db).await;
        let err = resolve(db.pool(), "demo/missing", None, Prefer::Task).await;
        assert!(matches!(err, Err(ResolveError::NotFound { .. })));
    }
}
