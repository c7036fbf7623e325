//! Container CRUD, including path derivation and slug-collision checks.

use chrono::Utc;
use flow_core::{Container, ContainerKind, FieldChange, FieldMap};
use sqlx::Sqlite;
use uuid::Uuid;

use super::{Result, StoreError, UpdateOutcome};
use crate::db::{parent_from_column, parent_to_column, ROOT_SENTINEL};
use crate::journal::{self, NewEvent};
use crate::store::counters::{format_friendly_id, next_value};

#[derive(sqlx::FromRow)]
struct ContainerRow {
    uuid: String,
    friendly_id: String,
    slug: String,
    title: Option<String>,
    parent_uuid: String,
    kind: String,
    section_uuid: Option<String>,
    sort_index: i64,
    version: i64,
    created_at: String,
    updated_at: String,
    archived_at: Option<String>,
    created_by_actor: Option<String>,
    updated_by_actor: Option<String>,
}

impl ContainerRow {
    fn into_container(self) -> Result<Container> {
        Ok(Container {
            uuid: parse_uuid(&self.uuid)?,
            friendly_id: self.friendly_id,
            slug: self.slug,
            title: self.title,
            parent_uuid: parent_from_column(parse_uuid(&self.parent_uuid)?),
            kind: ContainerKind::parse(&self.kind)
                .ok_or_else(|| StoreError::KindInvalid(self.kind.clone()))?,
            section_uuid: self.section_uuid.as_deref().map(parse_uuid).transpose()?,
            sort_index: self.sort_index,
            version: self.version,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            archived_at: self.archived_at.as_deref().map(parse_time),
            created_by_actor: self.created_by_actor.as_deref().map(parse_uuid).transpose()?,
            updated_by_actor: self.updated_by_actor.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}

const COLUMNS: &str = "uuid, friendly_id, slug, title, parent_uuid, kind, section_uuid, \
    sort_index, version, created_at, updated_at, archived_at, created_by_actor, updated_by_actor";

pub struct NewContainer {
    pub slug: String,
    pub title: Option<String>,
    pub parent_uuid: Option<Uuid>,
    pub kind: ContainerKind,
    pub created_by_actor: Option<Uuid>,
}

pub async fn create(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    params: NewContainer,
) -> Result<Container> {
    let parent_col = parent_to_column(params.parent_uuid);
    if exists_by_parent_slug(&mut **tx, parent_col, &params.slug).await? {
        return Err(StoreError::SlugCollision {
            parent: params.parent_uuid,
            slug: params.slug,
        });
    }

    let uuid = Uuid::new_v4();
    let counter = next_value(tx, "container").await?;
    let friendly_id = format_friendly_id("P", counter);
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO containers (uuid, friendly_id, slug, title, parent_uuid, kind, section_uuid,
                                 sort_index, version, created_at, updated_at, archived_at,
                                 created_by_actor, updated_by_actor)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, 1, ?7, ?7, NULL, ?8, ?8)
        "#,
    )
    .bind(uuid.to_string())
    .bind(&friendly_id)
    .bind(&params.slug)
    .bind(&params.title)
    .bind(parent_col.to_string())
    .bind(params.kind.as_str())
    .bind(now.to_rfc3339())
    .bind(params.created_by_actor.map(|u| u.to_string()))
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("container", "container.created")
            .actor(params.created_by_actor)
            .resource(uuid)
            .version(1),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(Container {
        uuid,
        friendly_id,
        slug: params.slug,
        title: params.title,
        parent_uuid: params.parent_uuid,
        kind: params.kind,
        section_uuid: None,
        sort_index: 0,
        version: 1,
        created_at: now,
        updated_at: now,
        archived_at: None,
        created_by_actor: params.created_by_actor,
        updated_by_actor: params.created_by_actor,
    })
}

async fn exists_by_parent_slug<'e, E>(executor: E, parent_col: Uuid, slug: &str) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM containers WHERE parent_uuid = ?1 AND slug = ?2",
    )
    .bind(parent_col.to_string())
    .bind(slug)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Container>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ContainerRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM containers WHERE uuid = ?1"))
            .bind(uuid.to_string())
            .fetch_optional(executor)
            .await?;
    row.map(ContainerRow::into_container).transpose()
}

pub async fn get_by_friendly_id<'e, E>(executor: E, friendly_id: &str) -> Result<Option<Container>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ContainerRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM containers WHERE friendly_id = ?1"
    ))
    .bind(friendly_id)
    .fetch_optional(executor)
    .await?;
    row.map(ContainerRow::into_container).transpose()
}

pub async fn get_by_parent_slug<'e, E>(
    executor: E,
    parent_uuid: Option<Uuid>,
    slug: &str,
) -> Result<Option<Container>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ContainerRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM containers WHERE parent_uuid = ?1 AND slug = ?2"
    ))
    .bind(parent_to_column(parent_uuid).to_string())
    .bind(slug)
    .fetch_optional(executor)
    .await?;
    row.map(ContainerRow::into_container).transpose()
}

pub async fn list_children<'e, E>(executor: E, parent_uuid: Option<Uuid>) -> Result<Vec<Container>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ContainerRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM containers WHERE parent_uuid = ?1 ORDER BY sort_index, slug"
    ))
    .bind(parent_to_column(parent_uuid).to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(ContainerRow::into_container).collect()
}

pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Container>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ContainerRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM containers ORDER BY slug"))
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(ContainerRow::into_container).collect()
}

/// Walk the `parent_uuid` chain from `uuid` to the root, returning the
/// `/`-joined path of slugs (root ancestor first). The path is always
/// derived, never stored.
pub async fn path_of(pool: &sqlx::Pool<Sqlite>, uuid: Uuid) -> Result<String> {
    let mut segments = Vec::new();
    let mut current = uuid;
    loop {
        let container = get_by_uuid(pool, current)
            .await?
            .ok_or(StoreError::NotFound { kind: "container", uuid: current.to_string() })?;
        segments.push(container.slug);
        match container.parent_uuid {
            Some(parent) => current = parent,
            None => break,
        }
    }
    segments.reverse();
    Ok(segments.join("/"))
}

/// True if `descendant` lies within `ancestor`'s subtree (inclusive), used to
/// reject moves that would create a cycle.
pub async fn is_within_subtree(
    pool: &sqlx::Pool<Sqlite>,
    ancestor: Uuid,
    descendant: Uuid,
) -> Result<bool> {
    let mut current = descendant;
    loop {
        if current == ancestor {
            return Ok(true);
        }
        let container = match get_by_uuid(pool, current).await? {
            Some(c) => c,
            None => return Ok(false),
        };
        match container.parent_uuid {
            Some(parent) => current = parent,
            None => return Ok(false),
        }
    }
}

/// Ensure every `/`-separated segment of `path` exists as a container
/// chain, creating missing segments as `project` kind, and return the leaf
/// container's uuid. Used by bundle apply to recreate `containers.json`'s
/// hierarchy and by cross-database merge to ensure the destination prefix.
pub async fn ensure_path(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    path: &str,
) -> Result<Uuid> {
    let mut parent = None;
    for segment in flow_core::normalize::split_path(path) {
        parent = Some(match get_by_parent_slug(&mut **tx, parent, &segment).await? {
            Some(c) => c.uuid,
            None => {
                create(
                    tx,
                    NewContainer {
                        slug: segment,
                        title: None,
                        parent_uuid: parent,
                        kind: ContainerKind::Project,
                        created_by_actor: actor,
                    },
                )
                .await?
                .uuid
            }
        });
    }
    parent.ok_or_else(|| StoreError::InvalidField(format!("empty container path: {path}")))
}

/// Hard-delete a container row. Containers have no soft-delete state (unlike
/// tasks' `state='deleted'`); a dropped container can orphan descendant
/// tasks, which `doctor`'s referential-integrity check is designed to catch.
pub async fn delete(tx: &mut sqlx::Transaction<'_, Sqlite>, actor: Option<Uuid>, uuid: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM containers WHERE uuid = ?1")
        .bind(uuid.to_string())
        .execute(&mut **tx)
        .await?;

    journal::log(tx, NewEvent::new("container", "container.deleted").actor(actor).resource(uuid))
        .await
        .map_err(StoreError::Db)?;

    Ok(())
}

/// Apply the `update_fields` contract to a container: optional version
/// check, field overwrite, version bump, event log.
pub async fn update_fields(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    actor: Option<Uuid>,
    uuid: Uuid,
    field_map: &FieldMap,
    if_match: i64,
) -> Result<UpdateOutcome> {
    let current = get_by_uuid(&mut **tx, uuid)
        .await?
        .ok_or(StoreError::NotFound { kind: "container", uuid: uuid.to_string() })?;

    if if_match > 0 && if_match != current.version {
        return Err(StoreError::VersionConflict {
            expected: if_match,
            actual: current.version,
        });
    }

    let mut title = current.title.clone();
    let mut slug = current.slug.clone();
    let mut parent_uuid = current.parent_uuid;
    let mut kind = current.kind;
    let mut sort_index = current.sort_index;
    let mut archived_at = current.archived_at;
    let mut changes = Vec::new();

    for (field, value) in field_map {
        match field.as_str() {
            "title" => {
                let new = value.as_str().map(str::to_string);
                changes.push(field_change(field, &current.title, &new));
                title = new;
            }
            "slug" => {
                let new = value
                    .as_str()
                    .ok_or_else(|| StoreError::InvalidField("slug".to_string()))?
                    .to_string();
                changes.push(field_change(field, &current.slug, &new));
                slug = new;
            }
            "parent_uuid" => {
                let new = value
                    .as_str()
                    .map(parse_uuid)
                    .transpose()?;
                changes.push(field_change(field, &current.parent_uuid.map(|u| u.to_string()), &new.map(|u| u.to_string())));
                parent_uuid = new;
            }
            "kind" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| StoreError::InvalidField("kind".to_string()))?;
                let new = ContainerKind::parse(raw).ok_or_else(|| StoreError::KindInvalid(raw.to_string()))?;
                kind = new;
            }
            "sort_index" => {
                sort_index = value
                    .as_i64()
                    .ok_or_else(|| StoreError::InvalidField("sort_index".to_string()))?;
            }
            "archived_at" => {
                archived_at = if value.is_null() {
                    None
                } else {
                    Some(parse_time(value.as_str().unwrap_or_default()))
                };
            }
            other => return Err(StoreError::InvalidField(other.to_string())),
        }
    }

    if (slug != current.slug || parent_uuid != current.parent_uuid)
        && exists_by_parent_slug(&mut **tx, parent_to_column(parent_uuid), &slug).await?
    {
        return Err(StoreError::SlugCollision { parent: parent_uuid, slug });
    }

    let new_version = current.version + 1;
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE containers SET title = ?1, slug = ?2, parent_uuid = ?3, kind = ?4, sort_index = ?5,
               archived_at = ?6, version = ?7, updated_at = ?8, updated_by_actor = ?9
        WHERE uuid = ?10
        "#,
    )
    .bind(&title)
    .bind(&slug)
    .bind(parent_to_column(parent_uuid).to_string())
    .bind(kind.as_str())
    .bind(sort_index)
    .bind(archived_at.map(|t| t.to_rfc3339()))
    .bind(new_version)
    .bind(now.to_rfc3339())
    .bind(actor.map(|u| u.to_string()))
    .bind(uuid.to_string())
    .execute(&mut **tx)
    .await?;

    journal::log(
        tx,
        NewEvent::new("container", "container.updated")
            .actor(actor)
            .resource(uuid)
            .version(new_version)
            .payload(serde_json::to_value(field_map).unwrap_or_default()),
    )
    .await
    .map_err(StoreError::Db)?;

    Ok(UpdateOutcome { new_version, changes })
}

fn field_change<T: serde::Serialize>(field: &str, current: &T, incoming: &T) -> FieldChange {
    FieldChange {
        field: field.to_string(),
        current: serde_json::to_value(current).unwrap_or(serde_json::Value::Null),
        incoming: serde_json::to_value(incoming).unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn create_root(tx: &mut sqlx::Transaction<'_, Sqlite>, slug: &str) -> Container {
        create(
            tx,
            NewContainer {
                slug: slug.to_string(),
                title: None,
                parent_uuid: None,
                kind: ContainerKind::Project,
                created_by_actor: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn root_slugs_share_one_namespace() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        create_root(&mut tx, "demo").await;
        let err = create(
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
        .unwrap_err();
        assert!(matches!(err, StoreError::SlugCollision { .. }));
    }

    #[tokio::test]
    async fn path_of_walks_to_root() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let root = create_root(&mut tx, "demo").await;
        let child = create(
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
        tx.commit().await.unwrap();

        let path = path_of(db.pool(), child.uuid).await.unwrap();
        assert_eq!(path, "demo/inbox");
    }

    #[tokio::test]
    async fn update_fields_rejects_stale_version() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let c = create_root(&mut tx, "demo").await;
        tx.commit().await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("title".to_string(), serde_json::json!("Demo"));

        let mut tx = db.begin().await.unwrap();
        let outcome = update_fields(&mut tx, None, c.uuid, &field_map, 1).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(outcome.new_version, 2);

        let mut tx = db.begin().await.unwrap();
        let err = update_fields(&mut tx, None, c.uuid, &field_map, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn ensure_path_creates_missing_segments_and_is_idempotent() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let leaf = ensure_path(&mut tx, None, "demo/inbox").await.unwrap();
        let leaf_again = ensure_path(&mut tx, None, "demo/inbox").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(leaf, leaf_again);
        assert_eq!(path_of(db.pool(), leaf).await.unwrap(), "demo/inbox");
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let c = create_root(&mut tx, "demo").await;
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        delete(&mut tx, None, c.uuid).await.unwrap();
        tx.commit().await.unwrap();

        assert!(get_by_uuid(db.pool(), c.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn is_within_subtree_detects_cycle_candidates() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let root = create_root(&mut tx, "demo").await;
        let child = create(
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
        tx.commit().await.unwrap();

        assert!(is_within_subtree(db.pool(), root.uuid, child.uuid).await.unwrap());
        assert!(!is_within_subtree(db.pool(), child.uuid, root.uuid).await.unwrap());
    }
}
