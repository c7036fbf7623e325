//! Actor CRUD.
//!
//! Actors are created on demand and never destroyed, and carry no `version`
//! column, so `update_fields` here has no optimistic-concurrency check
//! (see DESIGN.md for the reasoning).

use flow_core::{Actor, ActorRole, FieldMap};
use sqlx::Sqlite;
use uuid::Uuid;

use super::{StoreError, Result};
use crate::store::counters::{format_friendly_id, next_value};

#[derive(sqlx::FromRow)]
struct ActorRow {
    uuid: String,
    friendly_id: Option<String>,
    slug: String,
    display_name: Option<String>,
    role: String,
}

impl ActorRow {
    fn into_actor(self) -> Result<Actor> {
        Ok(Actor {
            uuid: Uuid::parse_str(&self.uuid).map_err(|e| StoreError::InvalidField(e.to_string()))?,
            friendly_id: self.friendly_id,
            slug: self.slug,
            display_name: self.display_name,
            role: ActorRole::parse(&self.role)
                .ok_or_else(|| StoreError::InvalidField(format!("role={}", self.role)))?,
        })
    }
}

const COLUMNS: &str = "uuid, friendly_id, slug, display_name, role";

pub struct NewActor {
    pub slug: String,
    pub display_name: Option<String>,
    pub role: ActorRole,
}

/// Create a new actor, allocating a friendly ID from the `actor` counter.
pub async fn create(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    params: NewActor,
) -> Result<Actor> {
    let uuid = Uuid::new_v4();
    let counter = next_value(tx, "actor").await?;
    let friendly_id = format_friendly_id("AC", counter);

    sqlx::query(
        "INSERT INTO actors (uuid, friendly_id, slug, display_name, role) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(uuid.to_string())
    .bind(&friendly_id)
    .bind(&params.slug)
    .bind(&params.display_name)
    .bind(params.role.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(Actor {
        uuid,
        friendly_id: Some(friendly_id),
        slug: params.slug,
        display_name: params.display_name,
        role: params.role,
    })
}

/// Fetch-or-create by slug: the common case for resolving a free-form actor
/// reference (e.g. `--actor alice`) without forcing callers to pre-register.
pub async fn get_or_create_by_slug(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    slug: &str,
    role: ActorRole,
) -> Result<Actor> {
    if let Some(existing) = get_by_slug(&mut **tx, slug).await? {
        return Ok(existing);
    }
    create(
        tx,
        NewActor {
            slug: slug.to_string(),
            display_name: None,
            role,
        },
    )
    .await
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Actor>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ActorRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM actors WHERE uuid = ?1"
    ))
    .bind(uuid.to_string())
    .fetch_optional(executor)
    .await?;
    row.map(ActorRow::into_actor).transpose()
}

pub async fn get_by_slug<'e, E>(executor: E, slug: &str) -> Result<Option<Actor>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ActorRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM actors WHERE slug = ?1"
    ))
    .bind(slug)
    .fetch_optional(executor)
    .await?;
    row.map(ActorRow::into_actor).transpose()
}

pub async fn get_by_friendly_id<'e, E>(executor: E, friendly_id: &str) -> Result<Option<Actor>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ActorRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM actors WHERE friendly_id = ?1"
    ))
    .bind(friendly_id)
    .fetch_optional(executor)
    .await?;
    row.map(ActorRow::into_actor).transpose()
}

pub async fn list(pool: &sqlx::Pool<Sqlite>) -> Result<Vec<Actor>> {
    let rows: Vec<ActorRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM actors ORDER BY slug"))
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(ActorRow::into_actor).collect()
}

/// Update mutable fields on an actor. No version check: actors have no
/// `version` column.
pub async fn update_fields(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    uuid: Uuid,
    field_map: &FieldMap,
) -> Result<Actor> {
    let current = get_by_uuid(&mut **tx, uuid)
        .await?
        .ok_or(StoreError::NotFound { kind: "actor", uuid: uuid.to_string() })?;

    let mut display_name = current.display_name.clone();
    let mut slug = current.slug.clone();
    let mut role = current.role;

    for (field, value) in field_map {
        match field.as_str() {
            "display_name" => display_name = value.as_str().map(str::to_string),
            "slug" => {
                slug = value
                    .as_str()
                    .ok_or_else(|| StoreError::InvalidField("slug".to_string()))?
                    .to_string()
            }
            "role" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| StoreError::InvalidField("role".to_string()))?;
                role = ActorRole::parse(raw)
                    .ok_or_else(|| StoreError::InvalidField(format!("role={raw}")))?;
            }
            other => return Err(StoreError::InvalidField(other.to_string())),
        }
    }

    sqlx::query("UPDATE actors SET display_name = ?1, slug = ?2, role = ?3 WHERE uuid = ?4")
        .bind(&display_name)
        .bind(&slug)
        .bind(role.as_str())
        .bind(uuid.to_string())
        .execute(&mut **tx)
        .await?;

    Ok(Actor {
        uuid,
        friendly_id: current.friendly_id,
        slug,
        display_name,
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn create_allocates_friendly_id() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let a = create(
            &mut tx,
            NewActor { slug: "alice".to_string(), display_name: None, role: ActorRole::Human },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(a.friendly_id.as_deref(), Some("AC-00001"));
    }

    #[tokio::test]
    async fn get_or_create_by_slug_is_idempotent() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let a = get_or_create_by_slug(&mut tx, "bob", ActorRole::Human).await.unwrap();
        let b = get_or_create_by_slug(&mut tx, "bob", ActorRole::Human).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(a.uuid, b.uuid);
    }
}
