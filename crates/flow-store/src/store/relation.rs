//! Directed task-to-task relation edges.

use flow_core::{Relation, RelationKind};
use sqlx::Sqlite;
use uuid::Uuid;

use super::{Result, StoreError};
use crate::db::DbError;
use crate::journal::{self, NewEvent};

#[derive(sqlx::FromRow)]
struct RelationRow {
    uuid: String,
    from_task: String,
    to_task: String,
    kind: String,
}

impl RelationRow {
    fn into_relation(self) -> Result<Relation> {
        Ok(Relation {
            uuid: parse_uuid(&self.uuid)?,
            from_task: parse_uuid(&self.from_task)?,
            to_task: parse_uuid(&self.to_task)?,
            kind: RelationKind(self.kind),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

/// Create a `(from_task, to_task, kind)` edge. A duplicate triple is
/// rejected by the table's UNIQUE constraint; the caller may treat that as
/// an idempotent no-op (see cross-database merge's relation dedup).
pub async fn create(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    from_task: Uuid,
    to_task: Uuid,
    kind: RelationKind,
) -> Result<Relation> {
    let uuid = Uuid::new_v4();
    sqlx::query("INSERT INTO relations (uuid, from_task, to_task, kind) VALUES (?1, ?2, ?3, ?4)")
        .bind(uuid.to_string())
        .bind(from_task.to_string())
        .bind(to_task.to_string())
        .bind(kind.0.clone())
        .execute(&mut **tx)
        .await?;

    journal::log(
        tx,
        NewEvent::new("relation", "relation.created")
            .actor(actor)
            .resource(uuid),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(Relation { uuid, from_task, to_task, kind })
}

pub async fn exists<'e, E>(
    executor: E,
    from_task: Uuid,
    to_task: Uuid,
    kind: &RelationKind,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM relations WHERE from_task = ?1 AND to_task = ?2 AND kind = ?3",
    )
    .bind(from_task.to_string())
    .bind(to_task.to_string())
    .bind(&kind.0)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

pub async fn delete(tx: &mut sqlx::Transaction<'_, Sqlite>, uuid: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM relations WHERE uuid = ?1")
        .bind(uuid.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn list_for_task<'e, E>(executor: E, task_uuid: Uuid) -> Result<Vec<Relation>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<RelationRow> = sqlx::query_as(
        "SELECT uuid, from_task, to_task, kind FROM relations WHERE from_task = ?1 OR to_task = ?1",
    )
    .bind(task_uuid.to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(RelationRow::into_relation).collect()
}

/// UUIDs of tasks `x` with a `(x, task_uuid, "blocks")` edge, without regard
/// to `x`'s current state — callers filter by resolved state themselves
/// (see `task::blocked_by`).
pub async fn blockers_of(
    pool: &sqlx::Pool<Sqlite>,
    task_uuid: Uuid,
) -> std::result::Result<Vec<Uuid>, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT from_task FROM relations WHERE to_task = ?1 AND kind = ?2",
    )
    .bind(task_uuid.to_string())
    .bind(RelationKind::BLOCKS)
    .fetch_all(pool)
    .await
    .map_err(DbError::Sqlx)?;

    Ok(rows
        .into_iter()
        .filter_map(|(s,)| Uuid::parse_str(&s).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn duplicate_triple_is_rejected() {
        let db = Db::open_in_memory().await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tx = db.begin().await.unwrap();
        // tasks table has no FK enforced dependency check here; relations are
        // keyed by UUID alone so this test exercises the relation table only.
        create(&mut tx, None, a, b, RelationKind::blocks()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = create(&mut tx, None, a, b, RelationKind::blocks()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn blockers_of_finds_incoming_blocks_edges() {
        let db = Db::open_in_memory().await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tx = db.begin().await.unwrap();
        create(&mut tx, None, a, b, RelationKind::blocks()).await.unwrap();
        tx.commit().await.unwrap();

        let blockers = blockers_of(db.pool(), b).await.unwrap();
        assert_eq!(blockers, vec![a]);
    }
}
