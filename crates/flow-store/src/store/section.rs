//! Section (board column / swimlane) CRUD.

use flow_core::Section;
use sqlx::Sqlite;
use uuid::Uuid;

use super::{Result, StoreError};

#[derive(sqlx::FromRow)]
struct SectionRow {
    uuid: String,
    project_uuid: String,
    slug: String,
    title: String,
    order_index: i64,
    role: String,
    is_default: i64,
    wip_limit: Option<i64>,
}

impl SectionRow {
    fn into_section(self) -> Result<Section> {
        Ok(Section {
            uuid: parse_uuid(&self.uuid)?,
            project_uuid: parse_uuid(&self.project_uuid)?,
            slug: self.slug,
            title: self.title,
            order_index: self.order_index,
            role: self.role,
            is_default: self.is_default != 0,
            wip_limit: self.wip_limit.map(|v| v as i32),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidField(e.to_string()))
}

const COLUMNS: &str = "uuid, project_uuid, slug, title, order_index, role, is_default, wip_limit";

pub struct NewSection {
    pub project_uuid: Uuid,
    pub slug: String,
    pub title: String,
    pub order_index: i64,
    pub role: String,
    pub is_default: bool,
    pub wip_limit: Option<i32>,
}

pub async fn create(tx: &mut sqlx::Transaction<'_, Sqlite>, params: NewSection) -> Result<Section> {
    if exists_by_project_slug(&mut **tx, params.project_uuid, &params.slug).await? {
        return Err(StoreError::SlugCollision {
            parent: Some(params.project_uuid),
            slug: params.slug,
        });
    }

    let uuid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sections (uuid, project_uuid, slug, title, order_index, role, is_default, wip_limit)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(uuid.to_string())
    .bind(params.project_uuid.to_string())
    .bind(&params.slug)
    .bind(&params.title)
    .bind(params.order_index)
    .bind(&params.role)
    .bind(params.is_default as i64)
    .bind(params.wip_limit)
    .execute(&mut **tx)
    .await?;

    Ok(Section {
        uuid,
        project_uuid: params.project_uuid,
        slug: params.slug,
        title: params.title,
        order_index: params.order_index,
        role: params.role,
        is_default: params.is_default,
        wip_limit: params.wip_limit,
    })
}

async fn exists_by_project_slug<'e, E>(executor: E, project_uuid: Uuid, slug: &str) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM sections WHERE project_uuid = ?1 AND slug = ?2")
            .bind(project_uuid.to_string())
            .bind(slug)
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

pub async fn get_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Section>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<SectionRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM sections WHERE uuid = ?1"))
            .bind(uuid.to_string())
            .fetch_optional(executor)
            .await?;
    row.map(SectionRow::into_section).transpose()
}

pub async fn list_for_project<'e, E>(executor: E, project_uuid: Uuid) -> Result<Vec<Section>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<SectionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM sections WHERE project_uuid = ?1 ORDER BY order_index"
    ))
    .bind(project_uuid.to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(SectionRow::into_section).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn slug_collision_within_project_is_rejected() {
        let db = Db::open_in_memory().await.unwrap();
        let project_uuid = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        create(
            &mut tx,
            NewSection {
                project_uuid,
                slug: "todo".to_string(),
                title: "To Do".to_string(),
                order_index: 0,
                role: "todo".to_string(),
                is_default: true,
                wip_limit: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = create(
            &mut tx,
            NewSection {
                project_uuid,
                slug: "todo".to_string(),
                title: "To Do Again".to_string(),
                order_index: 1,
                role: "todo".to_string(),
                is_default: false,
                wip_limit: None,
            },
        )
        .await;
        assert!(matches!(err, Err(StoreError::SlugCollision { .. })));
    }
}
