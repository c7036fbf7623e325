//! Attachment metadata CRUD. File content itself is the caller's concern;
//! this module only tracks the row (`relative_path`, checksum, size).

use flow_core::Attachment;
use sqlx::Sqlite;
use uuid::Uuid;

use super::{Result, StoreError};
use crate::journal::{self, NewEvent};
use crate::store::counters::{format_friendly_id, next_value};

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    uuid: String,
    friendly_id: String,
    task_uuid: String,
    filename: String,
    relative_path: String,
    mime_type: Option<String>,
    size_bytes: i64,
    checksum: Option<String>,
}

impl AttachmentRow {
    fn into_attachment(self) -> Result<Attachment> {
        Ok(Attachment {
            uuid: parse_uuid(&self.uuid)?,
            friendly_id: self.friendly_id,
            task_uuid: parse_uuid(&self.task_uuid)?,
            filename: self.filename,
            relative_path: self.relative_path,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

const COLUMNS: &str =
    "uuid, friendly_id, task_uuid, filename, relative_path, mime_type, size_bytes, checksum";

pub struct NewAttachment {
    pub task_uuid: Uuid,
    pub filename: String,
    pub relative_path: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
}

pub async fn create(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    params: NewAttachment,
) -> Result<Attachment> {
    if exists_by_relative_path(&mut **tx, &params.relative_path).await? {
        return Err(StoreError::InvalidField(format!(
            "relative_path already in use: {}",
            params.relative_path
        )));
    }

    let uuid = Uuid::new_v4();
    let counter = next_value(tx, "attachment").await?;
    let friendly_id = format_friendly_id("ATT", counter);

    sqlx::query(
        r#"
        INSERT INTO attachments (uuid, friendly_id, task_uuid, filename, relative_path, mime_type,
                                  size_bytes, checksum)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(uuid.to_string())
    .bind(&friendly_id)
    .bind(params.task_uuid.to_string())
    .bind(&params.filename)
    .bind(&params.relative_path)
    .bind(&params.mime_type)
    .bind(params.size_bytes)
    .bind(&params.checksum)
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("attachment", "attachment.created")
            .actor(actor)
            .resource(uuid),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(Attachment {
        uuid,
        friendly_id,
        task_uuid: params.task_uuid,
        filename: params.filename,
        relative_path: params.relative_path,
        mime_type: params.mime_type,
        size_bytes: params.size_bytes,
        checksum: params.checksum,
    })
}

async fn exists_by_relative_path<'e, E>(executor: E, relative_path: &str) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM attachments WHERE relative_path = ?1")
            .bind(relative_path)
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Attachment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<AttachmentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM attachments WHERE uuid = ?1"))
            .bind(uuid.to_string())
            .fetch_optional(executor)
            .await?;
    row.map(AttachmentRow::into_attachment).transpose()
}

pub async fn get_by_checksum<'e, E>(executor: E, checksum: &str) -> Result<Option<Attachment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<AttachmentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM attachments WHERE checksum = ?1"))
            .bind(checksum)
            .fetch_optional(executor)
            .await?;
    row.map(AttachmentRow::into_attachment).transpose()
}

pub async fn get_by_relative_path<'e, E>(executor: E, relative_path: &str) -> Result<Option<Attachment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<AttachmentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM attachments WHERE relative_path = ?1"))
            .bind(relative_path)
            .fetch_optional(executor)
            .await?;
    row.map(AttachmentRow::into_attachment).transpose()
}

pub async fn list_for_task<'e, E>(executor: E, task_uuid: Uuid) -> Result<Vec<Attachment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<AttachmentRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM attachments WHERE task_uuid = ?1 ORDER BY filename"
    ))
    .bind(task_uuid.to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(AttachmentRow::into_attachment).collect()
}

pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Attachment>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<AttachmentRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM attachments ORDER BY relative_path"))
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(AttachmentRow::into_attachment).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn relative_path_collision_is_rejected() {
        let db = Db::open_in_memory().await.unwrap();
        let task_uuid = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        create(
            &mut tx,
            None,
            NewAttachment {
                task_uuid,
                filename: "notes.txt".to_string(),
                relative_path: format!("{task_uuid}/notes.txt"),
                mime_type: None,
                size_bytes: 12,
                checksum: Some("abc".to_string()),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = create(
            &mut tx,
            None,
            NewAttachment {
                task_uuid,
                filename: "notes.txt".to_string(),
                relative_path: format!("{task_uuid}/notes.txt"),
                mime_type: None,
                size_bytes: 12,
                checksum: Some("abc".to_string()),
            },
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn get_by_checksum_finds_a_duplicate() {
        let db = Db::open_in_memory().await.unwrap();
        let task_uuid = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        create(
            &mut tx,
            None,
            NewAttachment {
                task_uuid,
                filename: "notes.txt".to_string(),
                relative_path: format!("{task_uuid}/notes.txt"),
                mime_type: None,
                size_bytes: 12,
                checksum: Some("deadbeef".to_string()),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let found = get_by_checksum(db.pool(), "deadbeef").await.unwrap();
        assert!(found.is_some());
    }
}
