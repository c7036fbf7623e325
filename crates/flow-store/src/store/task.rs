//! Task CRUD, cascade-delete, and the blocked-by check.

use chrono::Utc;
use flow_core::{FieldChange, FieldMap, Task, TaskKind, TaskResolution, TaskState};
use sqlx::Sqlite;
use uuid::Uuid;

use super::relation::blockers_of;
use super::{Result, StoreError, UpdateOutcome};
use crate::journal::{self, NewEvent};
use crate::store::counters::{format_friendly_id, next_value};

#[derive(sqlx::FromRow)]
struct TaskRow {
    uuid: String,
    friendly_id: String,
    slug: String,
    title: String,
    description: Option<String>,
    project_uuid: String,
    state: String,
    priority: i64,
    kind: String,
    parent_task_uuid: Option<String>,
    assignee_actor_uuid: Option<String>,
    start_at: Option<String>,
    due_at: Option<String>,
    labels: Option<String>,
    acknowledged_at: Option<String>,
    resolution: Option<String>,
    cp_project_id: Option<String>,
    cp_run_id: Option<String>,
    cp_session_id: Option<String>,
    sdk_session_id: Option<String>,
    run_status: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
    created_by_actor: Option<String>,
    updated_by_actor: Option<String>,
    completed_at: Option<String>,
    archived_at: Option<String>,
    deleted_at: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            uuid: parse_uuid(&self.uuid)?,
            friendly_id: self.friendly_id,
            slug: self.slug,
            title: self.title,
            description: self.description,
            project_uuid: parse_uuid(&self.project_uuid)?,
            state: TaskState::parse(&self.state)
                .ok_or_else(|| StoreError::StateInvalid(self.state.clone()))?,
            priority: self.priority as i32,
            kind: TaskKind::parse(&self.kind)
                .ok_or_else(|| StoreError::KindInvalid(self.kind.clone()))?,
            parent_task_uuid: opt_uuid(&self.parent_task_uuid)?,
            assignee_actor_uuid: opt_uuid(&self.assignee_actor_uuid)?,
            start_at: self.start_at.as_deref().map(parse_time),
            due_at: self.due_at.as_deref().map(parse_time),
            labels: self
                .labels
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| StoreError::InvalidField(e.to_string()))?,
            acknowledged_at: self.acknowledged_at.as_deref().map(parse_time),
            resolution: self
                .resolution
                .as_deref()
                .map(|r| {
                    TaskResolution::parse(r).ok_or_else(|| StoreError::ResolutionInvalid(r.to_string()))
                })
                .transpose()?,
            cp_project_id: self.cp_project_id,
            cp_run_id: self.cp_run_id,
            cp_session_id: self.cp_session_id,
            sdk_session_id: self.sdk_session_id,
            run_status: self
                .run_status
                .as_deref()
                .map(|r| {
                    flow_core::RunStatus::parse(r)
                        .ok_or_else(|| StoreError::RunStatusInvalid(r.to_string()))
                })
                .transpose()?,
            version: self.version,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            created_by_actor: opt_uuid(&self.created_by_actor)?,
            updated_by_actor: opt_uuid(&self.updated_by_actor)?,
            completed_at: self.completed_at.as_deref().map(parse_time),
            archived_at: self.archived_at.as_deref().map(parse_time),
            deleted_at: self.deleted_at.as_deref().map(parse_time),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

fn opt_uuid(s: &Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}

const COLUMNS: &str = "uuid, friendly_id, slug, title, description, project_uuid, state, \
    priority, kind, parent_task_uuid, assignee_actor_uuid, start_at, due_at, labels, \
    acknowledged_at, resolution, cp_project_id, cp_run_id, cp_session_id, sdk_session_id, \
    run_status, version, created_at, updated_at, created_by_actor, updated_by_actor, \
    completed_at, archived_at, deleted_at";

#[derive(Clone)]
pub struct NewTask {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub project_uuid: Uuid,
    pub priority: i32,
    pub kind: TaskKind,
    pub parent_task_uuid: Option<Uuid>,
    pub created_by_actor: Option<Uuid>,
}

fn validate_priority(priority: i32) -> Result<()> {
    if (1..=4).contains(&priority) {
        Ok(())
    } else {
        Err(StoreError::PriorityInvalid(priority.to_string()))
    }
}

/// Create a task under `params.project_uuid`. Defaults (`state=open`) are the
/// caller's responsibility to set via `params`; this function always starts
/// a fresh task in `open` state.
pub async fn create(tx: &mut sqlx::Transaction<'_, Sqlite>, params: NewTask) -> Result<Task> {
    validate_priority(params.priority)?;

    if exists_by_project_slug(&mut **tx, params.project_uuid, &params.slug).await? {
        return Err(StoreError::SlugCollision {
            parent: Some(params.project_uuid),
            slug: params.slug,
        });
    }

    let uuid = Uuid::new_v4();
    let counter = next_value(tx, "task").await?;
    let friendly_id = format_friendly_id("T", counter);
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO tasks (uuid, friendly_id, slug, title, description, project_uuid, state,
                            priority, kind, parent_task_uuid, version, created_at, updated_at,
                            created_by_actor, updated_by_actor)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7, ?8, ?9, 1, ?10, ?10, ?11, ?11)
        "#,
    )
    .bind(uuid.to_string())
    .bind(&friendly_id)
    .bind(&params.slug)
    .bind(&params.title)
    .bind(&params.description)
    .bind(params.project_uuid.to_string())
    .bind(params.priority)
    .bind(params.kind.as_str())
    .bind(params.parent_task_uuid.map(|u| u.to_string()))
    .bind(now.to_rfc3339())
    .bind(params.created_by_actor.map(|u| u.to_string()))
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("task", "task.created")
            .actor(params.created_by_actor)
            .resource(uuid)
            .version(1),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(Task {
        uuid,
        friendly_id,
        slug: params.slug,
        title: params.title,
        description: params.description,
        project_uuid: params.project_uuid,
        state: TaskState::Open,
        priority: params.priority,
        kind: params.kind,
        parent_task_uuid: params.parent_task_uuid,
        assignee_actor_uuid: None,
        start_at: None,
        due_at: None,
        labels: None,
        acknowledged_at: None,
        resolution: None,
        cp_project_id: None,
        cp_run_id: None,
        cp_session_id: None,
        sdk_session_id: None,
        run_status: None,
        version: 1,
        created_at: now,
        updated_at: now,
        created_by_actor: params.created_by_actor,
        updated_by_actor: params.created_by_actor,
        completed_at: None,
        archived_at: None,
        deleted_at: None,
    })
}

async fn exists_by_project_slug<'e, E>(executor: E, project_uuid: Uuid, slug: &str) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM tasks WHERE project_uuid = ?1 AND slug = ?2")
            .bind(project_uuid.to_string())
            .bind(slug)
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Task>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<TaskRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM tasks WHERE uuid = ?1"))
            .bind(uuid.to_string())
            .fetch_optional(executor)
            .await?;
    row.map(TaskRow::into_task).transpose()
}

pub async fn get_by_friendly_id<'e, E>(executor: E, friendly_id: &str) -> Result<Option<Task>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<TaskRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM tasks WHERE friendly_id = ?1"))
            .bind(friendly_id)
            .fetch_optional(executor)
            .await?;
    row.map(TaskRow::into_task).transpose()
}

pub async fn get_by_project_slug<'e, E>(
    executor: E,
    project_uuid: Uuid,
    slug: &str,
) -> Result<Option<Task>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<TaskRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM tasks WHERE project_uuid = ?1 AND slug = ?2"
    ))
    .bind(project_uuid.to_string())
    .bind(slug)
    .fetch_optional(executor)
    .await?;
    row.map(TaskRow::into_task).transpose()
}

pub async fn list_by_project(pool: &sqlx::Pool<Sqlite>, project_uuid: Uuid) -> Result<Vec<Task>> {
    let rows: Vec<TaskRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM tasks WHERE project_uuid = ?1 ORDER BY slug"
    ))
    .bind(project_uuid.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

pub async fn list_children(pool: &sqlx::Pool<Sqlite>, parent_task_uuid: Uuid) -> Result<Vec<Task>> {
    let rows: Vec<TaskRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM tasks WHERE parent_task_uuid = ?1 ORDER BY slug"
    ))
    .bind(parent_task_uuid.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Task>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<TaskRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM tasks ORDER BY friendly_id"))
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

/// Tasks whose slug or title matches `pattern` (a shell-style glob, see
/// `flow_core::normalize::glob_to_sql_pattern`), optionally scoped to one
/// project.
pub async fn find(
    pool: &sqlx::Pool<Sqlite>,
    pattern: &str,
    project_uuid: Option<Uuid>,
) -> Result<Vec<Task>> {
    let rows: Vec<TaskRow> = match project_uuid {
        Some(project) => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM tasks WHERE project_uuid = ?1 AND (slug GLOB ?2 OR title GLOB ?2) \
                 ORDER BY slug"
            ))
            .bind(project.to_string())
            .bind(pattern)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM tasks WHERE slug GLOB ?1 OR title GLOB ?1 ORDER BY friendly_id"
            ))
            .bind(pattern)
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(TaskRow::into_task).collect()
}

/// Tasks `x` with a `(x, task_uuid, "blocks")` relation where `x` has not
/// reached a resolved state.
pub async fn blocked_by(pool: &sqlx::Pool<Sqlite>, task_uuid: Uuid) -> Result<Vec<Task>> {
    let candidate_uuids = blockers_of(pool, task_uuid).await.map_err(StoreError::Db)?;
    let mut blockers = Vec::new();
    for uuid in candidate_uuids {
        if let Some(task) = get_by_uuid(pool, uuid).await? {
            if !task.state.is_resolved() {
                blockers.push(task);
            }
        }
    }
    Ok(blockers)
}

/// Apply the `update_fields` contract: optional version check, field
/// overwrite, version bump, event log, and — when `state` transitions to
/// `deleted` — recursive cascade to descendants via `parent_task_uuid`.
pub async fn update_fields(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    uuid: Uuid,
    field_map: &FieldMap,
    if_match: i64,
) -> Result<UpdateOutcome> {
    let current = get_by_uuid(&mut **tx, uuid)
        .await?
        .ok_or(StoreError::NotFound { kind: "task", uuid: uuid.to_string() })?;

    if if_match > 0 && if_match != current.version {
        return Err(StoreError::VersionConflict {
            expected: if_match,
            actual: current.version,
        });
    }

    let mut next = current.clone();
    let mut changes = Vec::new();

    for (field, value) in field_map {
        apply_field(&mut next, field, value, &current, &mut changes)?;
    }

    if (next.slug != current.slug || next.project_uuid != current.project_uuid)
        && exists_by_project_slug(&mut **tx, next.project_uuid, &next.slug).await?
    {
        return Err(StoreError::SlugCollision {
            parent: Some(next.project_uuid),
            slug: next.slug,
        });
    }

    let new_version = current.version + 1;
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE tasks SET slug = ?1, title = ?2, description = ?3, project_uuid = ?4, state = ?5,
               priority = ?6, kind = ?7, parent_task_uuid = ?8, assignee_actor_uuid = ?9,
               start_at = ?10, due_at = ?11, labels = ?12, acknowledged_at = ?13, resolution = ?14,
               cp_project_id = ?15, cp_run_id = ?16, cp_session_id = ?17, sdk_session_id = ?18,
               run_status = ?19, version = ?20, updated_at = ?21, updated_by_actor = ?22,
               completed_at = ?23, archived_at = ?24, deleted_at = ?25
        WHERE uuid = ?26
        "#,
    )
    .bind(&next.slug)
    .bind(&next.title)
    .bind(&next.description)
    .bind(next.project_uuid.to_string())
    .bind(next.state.as_str())
    .bind(next.priority)
    .bind(next.kind.as_str())
    .bind(next.parent_task_uuid.map(|u| u.to_string()))
    .bind(next.assignee_actor_uuid.map(|u| u.to_string()))
    .bind(next.start_at.map(|t| t.to_rfc3339()))
    .bind(next.due_at.map(|t| t.to_rfc3339()))
    .bind(next.labels.as_ref().map(|l| serde_json::to_string(l).unwrap_or_default()))
    .bind(next.acknowledged_at.map(|t| t.to_rfc3339()))
    .bind(next.resolution.map(|r| r.as_str()))
    .bind(&next.cp_project_id)
    .bind(&next.cp_run_id)
    .bind(&next.cp_session_id)
    .bind(&next.sdk_session_id)
    .bind(next.run_status.map(|r| r.as_str()))
    .bind(new_version)
    .bind(now.to_rfc3339())
    .bind(actor.map(|u| u.to_string()))
    .bind(next.completed_at.map(|t| t.to_rfc3339()))
    .bind(next.archived_at.map(|t| t.to_rfc3339()))
    .bind(next.deleted_at.map(|t| t.to_rfc3339()))
    .bind(uuid.to_string())
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("task", "task.updated")
            .actor(actor)
            .resource(uuid)
            .version(new_version)
            .payload(serde_json::to_value(field_map).unwrap_or_default()),
    )
    .await
    .map_err(StoreError::Db)?;

    if next.state == TaskState::Deleted && current.state != TaskState::Deleted {
        cascade_delete_descendants(tx, actor, uuid).await?;
    }

    Ok(UpdateOutcome { new_version, changes })
}

fn apply_field(
    next: &mut Task,
    field: &str,
    value: &serde_json::Value,
    current: &Task,
    changes: &mut Vec<FieldChange>,
) -> Result<()> {
    macro_rules! record {
        ($old:expr, $new:expr) => {
            changes.push(FieldChange {
                field: field.to_string(),
                current: serde_json::to_value(&$old).unwrap_or(serde_json::Value::Null),
                incoming: serde_json::to_value(&$new).unwrap_or(serde_json::Value::Null),
            })
        };
    }

    match field {
        "slug" => {
            let v = value
                .as_str()
                .ok_or_else(|| StoreError::InvalidField("slug".to_string()))?
                .to_string();
            record!(current.slug, v);
            next.slug = v;
        }
        "title" => {
            let v = value
                .as_str()
                .ok_or_else(|| StoreError::InvalidField("title".to_string()))?
                .to_string();
            record!(current.title, v);
            next.title = v;
        }
        "description" => {
            let v = value.as_str().map(str::to_string);
            record!(current.description, v);
            next.description = v;
        }
        "project_uuid" => {
            let v = value
                .as_str()
                .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string())))
                .transpose()?
                .ok_or_else(|| StoreError::InvalidField("project_uuid".to_string()))?;
            next.project_uuid = v;
        }
        "state" => {
            let raw = value
                .as_str()
                .ok_or_else(|| StoreError::InvalidField("state".to_string()))?;
            let v = TaskState::parse(raw).ok_or_else(|| StoreError::StateInvalid(raw.to_string()))?;
            record!(current.state.as_str(), v.as_str());
            next.state = v;
            if v == TaskState::Completed && current.state != TaskState::Completed {
                next.completed_at = Some(Utc::now());
            }
            if v == TaskState::Archived && current.state != TaskState::Archived {
                next.archived_at = Some(Utc::now());
            }
            if v == TaskState::Deleted && current.state != TaskState::Deleted {
                next.deleted_at = Some(Utc::now());
            }
        }
        "priority" => {
            let v = value
                .as_i64()
                .ok_or_else(|| StoreError::InvalidField("priority".to_string()))? as i32;
            validate_priority(v)?;
            record!(current.priority, v);
            next.priority = v;
        }
        "kind" => {
            let raw = value
                .as_str()
                .ok_or_else(|| StoreError::InvalidField("kind".to_string()))?;
            next.kind = TaskKind::parse(raw).ok_or_else(|| StoreError::KindInvalid(raw.to_string()))?;
        }
        "parent_task_uuid" => {
            next.parent_task_uuid = value
                .as_str()
                .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string())))
                .transpose()?;
        }
        "assignee_actor_uuid" => {
            next.assignee_actor_uuid = value
                .as_str()
                .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string())))
                .transpose()?;
        }
        "start_at" => {
            next.start_at = opt_datetime(value)?;
        }
        "due_at" => {
            next.due_at = opt_datetime(value)?;
        }
        "labels" => {
            next.labels = if value.is_null() {
                None
            } else {
                Some(
                    serde_json::from_value(value.clone())
                        .map_err(|e| StoreError::InvalidField(e.to_string()))?,
                )
            };
        }
        "acknowledged_at" => {
            next.acknowledged_at = opt_datetime(value)?;
        }
        "resolution" => {
            next.resolution = value
                .as_str()
                .map(|raw| {
                    TaskResolution::parse(raw).ok_or_else(|| StoreError::ResolutionInvalid(raw.to_string()))
                })
                .transpose()?;
        }
        "cp_project_id" => next.cp_project_id = value.as_str().map(str::to_string),
        "cp_run_id" => next.cp_run_id = value.as_str().map(str::to_string),
        "cp_session_id" => next.cp_session_id = value.as_str().map(str::to_string),
        "sdk_session_id" => next.sdk_session_id = value.as_str().map(str::to_string),
        "run_status" => {
            next.run_status = value
                .as_str()
                .map(|raw| {
                    flow_core::RunStatus::parse(raw)
                        .ok_or_else(|| StoreError::RunStatusInvalid(raw.to_string()))
                })
                .transpose()?;
        }
        other => return Err(StoreError::InvalidField(other.to_string())),
    }
    Ok(())
}

fn opt_datetime(value: &serde_json::Value) -> Result<Option<chrono::DateTime<Utc>>> {
    if value.is_null() {
        return Ok(None);
    }
    let raw = value
        .as_str()
        .ok_or_else(|| StoreError::InvalidField("timestamp".to_string()))?;
    raw.parse()
        .map(Some)
        .map_err(|_| StoreError::InvalidField(raw.to_string()))
}

async fn cascade_delete_descendants(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    parent_uuid: Uuid,
) -> Result<()> {
    let children: Vec<(String,)> = sqlx::query_as(
        "SELECT uuid FROM tasks WHERE parent_task_uuid = ?1 AND state != 'deleted'",
    )
    .bind(parent_uuid.to_string())
    .fetch_all(&mut **tx)
    .await?;

    for (child_uuid,) in children {
        let child_uuid = parse_uuid(&child_uuid)?;
        let current = get_by_uuid(&mut **tx, child_uuid)
            .await?
            .ok_or(StoreError::NotFound { kind: "task", uuid: child_uuid.to_string() })?;
        let new_version = current.version + 1;
        let now = Utc::now();

        sqlx::query(
            "UPDATE tasks SET state = 'deleted', deleted_at = ?1, version = ?2, updated_at = ?1, \
             updated_by_actor = ?3 WHERE uuid = ?4",
        )
        .bind(now.to_rfc3339())
        .bind(new_version)
        .bind(actor.map(|u| u.to_string()))
        .bind(child_uuid.to_string())
        .execute(&mut **tx)
        .await?;

        journal::log(
            tx,
            NewEvent::new("task", "task.deleted")
                .actor(actor)
                .resource(child_uuid)
                .version(new_version),
        )
        .await
        .map_err(StoreError::Db)?;

        Box::pin(cascade_delete_descendants(tx, actor, child_uuid)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::store::container::{self, NewContainer};
    use flow_core::ContainerKind;

    async fn seed_project(tx: &mut sqlx::Transaction<'_, Sqlite>) -> Uuid {
        container::create(
            tx,
            NewContainer {
                slug: "demo".to_string(),
                title: None,
                parent_uuid: None,
                kind: ContainerKind::Project,
                created_by_actor: None,
            },
        )
        .await
        .unwrap()
        .uuid
    }

    fn new_task(project_uuid: Uuid, slug: &str) -> NewTask {
        NewTask {
            slug: slug.to_string(),
            title: "Fix the bug".to_string(),
            description: None,
            project_uuid,
            priority: 3,
            kind: TaskKind::Task,
            parent_task_uuid: None,
            created_by_actor: None,
        }
    }

    #[tokio::test]
    async fn version_conflict_leaves_row_untouched() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = seed_project(&mut tx).await;
        let t = create(&mut tx, new_task(project, "fix-bug")).await.unwrap();
        tx.commit().await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("priority".to_string(), serde_json::json!(2));

        let mut tx = db.begin().await.unwrap();
        let outcome = update_fields(&mut tx, None, t.uuid, &field_map, 1).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(outcome.new_version, 2);

        let mut tx = db.begin().await.unwrap();
        let err = update_fields(&mut tx, None, t.uuid, &field_map, 1).await.unwrap_err();
        tx.commit().await.unwrap();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));

        let row = get_by_uuid(db.pool(), t.uuid).await.unwrap().unwrap();
        assert_eq!(row.priority, 2);
    }

    #[tokio::test]
    async fn deleting_a_task_cascades_to_descendants() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = seed_project(&mut tx).await;
        let a = create(&mut tx, new_task(project, "a")).await.unwrap();
        let mut b_params = new_task(project, "b");
        b_params.parent_task_uuid = Some(a.uuid);
        let b = create(&mut tx, b_params).await.unwrap();
        let mut c_params = new_task(project, "c");
        c_params.parent_task_uuid = Some(b.uuid);
        let c = create(&mut tx, c_params).await.unwrap();
        tx.commit().await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("state".to_string(), serde_json::json!("deleted"));

        let mut tx = db.begin().await.unwrap();
        update_fields(&mut tx, None, a.uuid, &field_map, 0).await.unwrap();
        tx.commit().await.unwrap();

        for uuid in [a.uuid, b.uuid, c.uuid] {
            let row = get_by_uuid(db.pool(), uuid).await.unwrap().unwrap();
            assert_eq!(row.state, TaskState::Deleted);
        }

        let events = crate::journal::list_all(db.pool()).await.unwrap();
        let deleted_events = events.iter().filter(|e| e.event_type == "task.deleted").count();
        assert_eq!(deleted_events, 3);
    }

    #[tokio::test]
    async fn rejects_priority_out_of_range() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = seed_project(&mut tx).await;
        let mut params = new_task(project, "fix-bug");
        params.priority = 9;
        let err = create(&mut tx, params).await.unwrap_err();
        assert!(matches!(err, StoreError::PriorityInvalid(_)));
    }

    #[tokio::test]
    async fn slug_collision_within_project_is_rejected() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = seed_project(&mut tx).await;
        create(&mut tx, new_task(project, "fix-bug")).await.unwrap();
        let err = create(&mut tx, new_task(project, "fix-bug")).await.unwrap_err();
        assert!(matches!(err, StoreError::SlugCollision { .. }));
    }
}
