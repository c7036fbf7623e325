//! Append-only event journal.
//!
//! `log` is the sole exposed operation: it writes one row inside the
//! caller-provided transaction. There is no background flush and no batching
//! — failure to log aborts the transaction it runs in, because the caller's
//! `?` propagates the error up through the same transaction.

use chrono::Utc;
use flow_core::Event;
use sqlx::Sqlite;
use uuid::Uuid;

use crate::db::DbError;

/// A not-yet-persisted event; `id` and `timestamp` are assigned by `log`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub actor_uuid: Option<Uuid>,
    pub resource_type: String,
    pub resource_uuid: Option<Uuid>,
    pub event_type: String,
    pub version: Option<i64>,
    pub payload: Option<serde_json::Value>,
}

impl NewEvent {
    pub fn new(resource_type: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            actor_uuid: None,
            resource_type: resource_type.into(),
            resource_uuid: None,
            event_type: event_type.into(),
            version: None,
            payload: None,
        }
    }

    pub fn actor(mut self, actor_uuid: Option<Uuid>) -> Self {
        self.actor_uuid = actor_uuid;
        self
    }

    pub fn resource(mut self, resource_uuid: Uuid) -> Self {
        self.resource_uuid = Some(resource_uuid);
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Append one event row inside `tx`, returning the assigned monotone id.
///
/// Events within a single transaction are ordered by append sequence
/// (SQLite's `AUTOINCREMENT` rowid assignment order); across transactions,
/// ordering follows commit order. Consumers that need a total order should
/// sort by `id`.
pub async fn log(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    event: NewEvent,
) -> Result<i64, DbError> {
    let now = Utc::now();
    let payload_json = event
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DbError::Io(std::io::Error::other(e)))?;

    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO events (timestamp, actor_uuid, resource_type, resource_uuid, event_type, version, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(event.actor_uuid.map(|u| u.to_string()))
    .bind(&event.resource_type)
    .bind(event.resource_uuid.map(|u| u.to_string()))
    .bind(&event.event_type)
    .bind(event.version)
    .bind(payload_json)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.0)
}

/// Read events for a given resource, oldest first, for diagnostics and
/// bundle export (`events.ndjson`).
pub async fn list_for_resource(
    pool: &sqlx::Pool<Sqlite>,
    resource_uuid: Uuid,
) -> Result<Vec<Event>, DbError> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT id, timestamp, actor_uuid, resource_type, resource_uuid, event_type, version, payload \
         FROM events WHERE resource_uuid = ?1 ORDER BY id ASC",
    )
    .bind(resource_uuid.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(EventRow::into_event).collect())
}

/// Read all events, oldest first, for full-database bundle export.
pub async fn list_all(pool: &sqlx::Pool<Sqlite>) -> Result<Vec<Event>, DbError> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT id, timestamp, actor_uuid, resource_type, resource_uuid, event_type, version, payload \
         FROM events ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(EventRow::into_event).collect())
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    timestamp: String,
    actor_uuid: Option<String>,
    resource_type: String,
    resource_uuid: Option<String>,
    event_type: String,
    version: Option<i64>,
    payload: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Event {
        Event {
            id: self.id,
            timestamp: self
                .timestamp
                .parse()
                .unwrap_or_else(|_| Utc::now().into()),
            actor_uuid: self.actor_uuid.and_then(|s| Uuid::parse_str(&s).ok()),
            resource_type: self.resource_type,
            resource_uuid: self.resource_uuid.and_then(|s| Uuid::parse_str(&s).ok()),
            event_type: self.event_type,
            version: self.version,
            payload: self
                .payload
                .and_then(|p| serde_json::from_str(&p).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn log_assigns_monotone_ids_within_a_transaction() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let id1 = log(&mut tx, NewEvent::new("task", "task.created")).await.unwrap();
        let id2 = log(&mut tx, NewEvent::new("task", "task.updated")).await.unwrap();
        tx.commit().await.unwrap();
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn list_for_resource_returns_in_order() {
        let db = Db::open_in_memory().await.unwrap();
        let resource = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        log(&mut tx, NewEvent::new("task", "task.created").resource(resource))
            .await
            .unwrap();
        log(&mut tx, NewEvent::new("task", "task.updated").resource(resource))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let events = list_for_resource(db.pool(), resource).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "task.created");
        assert_eq!(events[1].event_type, "task.updated");
    }
}
