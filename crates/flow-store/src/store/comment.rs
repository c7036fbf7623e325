//! Comment CRUD.

use chrono::Utc;
use flow_core::{Comment, FieldMap};
use sqlx::Sqlite;
use uuid::Uuid;

use super::{Result, StoreError, UpdateOutcome};
use crate::journal::{self, NewEvent};
use crate::store::counters::{format_friendly_id, next_value};

#[derive(sqlx::FromRow)]
struct CommentRow {
    uuid: String,
    friendly_id: String,
    task_uuid: String,
    actor_uuid: String,
    body: String,
    version: i64,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
    deleted_by: Option<String>,
}

impl CommentRow {
    fn into_comment(self) -> Result<Comment> {
        Ok(Comment {
            uuid: parse_uuid(&self.uuid)?,
            friendly_id: self.friendly_id,
            task_uuid: parse_uuid(&self.task_uuid)?,
            actor_uuid: parse_uuid(&self.actor_uuid)?,
            body: self.body,
            version: self.version,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            deleted_at: self.deleted_at.as_deref().map(parse_time),
            deleted_by: self.deleted_by.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}

const COLUMNS: &str =
    "uuid, friendly_id, task_uuid, actor_uuid, body, version, created_at, updated_at, deleted_at, deleted_by";

pub struct NewComment {
    pub task_uuid: Uuid,
    pub actor_uuid: Uuid,
    pub body: String,
}

pub async fn create(tx: &mut sqlx::Transaction<'_, Sqlite>, params: NewComment) -> Result<Comment> {
    let uuid = Uuid::new_v4();
    let counter = next_value(tx, "comment").await?;
    let friendly_id = format_friendly_id("C", counter);
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO comments (uuid, friendly_id, task_uuid, actor_uuid, body, version, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
        "#,
    )
    .bind(uuid.to_string())
    .bind(&friendly_id)
    .bind(params.task_uuid.to_string())
    .bind(params.actor_uuid.to_string())
    .bind(&params.body)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("comment", "comment.created")
            .actor(Some(params.actor_uuid))
            .resource(uuid)
            .version(1),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(Comment {
        uuid,
        friendly_id,
        task_uuid: params.task_uuid,
        actor_uuid: params.actor_uuid,
        body: params.body,
        version: 1,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        deleted_by: None,
    })
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Comment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<CommentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM comments WHERE uuid = ?1"))
            .bind(uuid.to_string())
            .fetch_optional(executor)
            .await?;
    row.map(CommentRow::into_comment).transpose()
}

pub async fn list_for_task<'e, E>(executor: E, task_uuid: Uuid) -> Result<Vec<Comment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<CommentRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM comments WHERE task_uuid = ?1 ORDER BY created_at"
    ))
    .bind(task_uuid.to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(CommentRow::into_comment).collect()
}

pub async fn update_fields(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    uuid: Uuid,
    field_map: &FieldMap,
    if_match: i64,
) -> Result<UpdateOutcome> {
    let current = get_by_uuid(&mut **tx, uuid)
        .await?
        .ok_or(StoreError::NotFound { kind: "comment", uuid: uuid.to_string() })?;

    if if_match > 0 && if_match != current.version {
        return Err(StoreError::VersionConflict {
            expected: if_match,
            actual: current.version,
        });
    }

    let mut body = current.body.clone();
    let mut deleted_at = current.deleted_at;
    let mut deleted_by = current.deleted_by;

    for (field, value) in field_map {
        match field.as_str() {
            "body" => {
                body = value
                    .as_str()
                    .ok_or_else(|| StoreError::InvalidField("body".to_string()))?
                    .to_string()
            }
            "deleted_at" => {
                deleted_at = if value.is_null() {
                    None
                } else {
                    Some(parse_time(value.as_str().unwrap_or_default()))
                };
                deleted_by = actor;
            }
            other => return Err(StoreError::InvalidField(other.to_string())),
        }
    }

    let new_version = current.version + 1;
    let now = Utc::now();

    sqlx::query(
        "UPDATE comments SET body = ?1, version = ?2, updated_at = ?3, deleted_at = ?4, deleted_by = ?5 \
         WHERE uuid = ?6",
    )
    .bind(&body)
    .bind(new_version)
    .bind(now.to_rfc3339())
    .bind(deleted_at.map(|t| t.to_rfc3339()))
    .bind(deleted_by.map(|u| u.to_string()))
    .bind(uuid.to_string())
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("comment", "comment.updated")
            .actor(actor)
            .resource(uuid)
            .version(new_version)
            .payload(serde_json::to_value(field_map).unwrap_or_default()),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(UpdateOutcome { new_version, changes: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn create_allocates_friendly_id_and_logs_event() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let c = create(
            &mut tx,
            NewComment {
                task_uuid: Uuid::new_v4(),
                actor_uuid: Uuid::new_v4(),
                body: "looks good".to_string(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(c.friendly_id, "C-00001");
    }

    #[tokio::test]
    async fn update_fields_bumps_version() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let c = create(
            &mut tx,
            NewComment {
                task_uuid: Uuid::new_v4(),
                actor_uuid: Uuid::new_v4(),
                body: "first".to_string(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("body".to_string(), serde_json::json!("edited"));
        let mut tx = db.begin().await.unwrap();
        let outcome = update_fields(&mut tx, None, c.uuid, &field_map, 0).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(outcome.new_version, 2);
    }
}
