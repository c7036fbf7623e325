//! Database connection, pragmas, and migrations.
//!
//! A small pool wrapper that enables WAL mode and runs embedded migrations,
//! with no business logic of its own.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use uuid::Uuid;

/// Sentinel used in place of SQL `NULL` for "no parent container" so that the
/// `(parent_uuid, slug)` UNIQUE index enforces a single shared root-level
/// namespace (see migrations/0001_init.sql).
pub const ROOT_SENTINEL: Uuid = Uuid::nil();

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Thin wrapper over a `sqlx::Pool<Sqlite>`.
#[derive(Debug, Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// Open (creating if necessary) the database file at `db_path`, enable
    /// WAL mode and foreign keys, and run pending migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open an in-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let migrations = [include_str!("../migrations/0001_init.sql")];
        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if trimmed.is_empty() {
                    continue;
                }
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Take a WAL-safe point-in-time copy of the database file at
    /// `dest_path` via SQLite's `VACUUM INTO`.
    pub async fn snapshot_to(&self, dest_path: &Path) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        sqlx::query("VACUUM INTO ?1")
            .bind(dest_path.display().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Convert the stored `(parent_uuid)` column value back to the domain
/// `Option<Uuid>`, undoing the [`ROOT_SENTINEL`] substitution.
pub fn parent_from_column(raw: Uuid) -> Option<Uuid> {
    if raw == ROOT_SENTINEL {
        None
    } else {
        Some(raw)
    }
}

/// Convert a domain `Option<Uuid>` parent into the column value stored on
/// disk, substituting [`ROOT_SENTINEL`] for `None`.
pub fn parent_to_column(parent: Option<Uuid>) -> Uuid {
    parent.unwrap_or(ROOT_SENTINEL)
}
