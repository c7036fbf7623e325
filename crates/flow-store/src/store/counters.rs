//! Friendly-ID allocation.
//!
//! New friendly IDs are drawn from a persistent counter per entity kind, not
//! `max(id)+1`, so that deleting an entity never frees its ID for reuse.
//! `doctor --fix` resyncs a drifted counter to `max(id)+1`.

use sqlx::Sqlite;

use super::StoreError;

/// Increment and return the next value of `entity_kind`'s counter, inside
/// the caller's transaction so the allocation is part of the same atomic
/// create.
pub async fn next_value(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    entity_kind: &str,
) -> Result<i64, StoreError> {
    sqlx::query("INSERT INTO counters (entity_kind, next_value) VALUES (?1, 1) \
                 ON CONFLICT(entity_kind) DO UPDATE SET next_value = next_value + 1")
        .bind(entity_kind)
        .execute(&mut **tx)
        .await?;

    let row: (i64,) = sqlx::query_as("SELECT next_value FROM counters WHERE entity_kind = ?1")
        .bind(entity_kind)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.0)
}

/// Format a friendly ID from an entity kind's fixed prefix and a counter
/// value, e.g. `T-00042`.
pub fn format_friendly_id(prefix: &str, value: i64) -> String {
    format!("{prefix}-{value:05}")
}

/// Read the current counter value without incrementing it (used by doctor
/// and by cross-database merge's counter-drift fix).
pub async fn current_value<'e, E>(executor: E, entity_kind: &str) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT next_value FROM counters WHERE entity_kind = ?1")
            .bind(entity_kind)
            .fetch_optional(executor)
            .await?;
    Ok(row.map_or(0, |r| r.0))
}

/// Force the counter for `entity_kind` to `value` (doctor `--fix`, merge's
/// drift fix).
pub async fn set_value<'e, E>(executor: E, entity_kind: &str, value: i64) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO counters (entity_kind, next_value) VALUES (?1, ?2) \
         ON CONFLICT(entity_kind) DO UPDATE SET next_value = ?2",
    )
    .bind(entity_kind)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn next_value_increments_monotonically() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let a = next_value(&mut tx, "task").await.unwrap();
        let b = next_value(&mut tx, "task").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn counters_are_independent_per_kind() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let t = next_value(&mut tx, "task").await.unwrap();
        let c = next_value(&mut tx, "container").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(t, 1);
        assert_eq!(c, 1);
    }

    #[test]
    fn format_friendly_id_pads_to_five_digits() {
        assert_eq!(format_friendly_id("T", 42), "T-00042");
    }
}
