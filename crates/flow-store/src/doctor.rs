//! Read-only integrity checks against a database, plus an optional `--fix`
//! pass for the subset of findings that are safe to repair automatically
//! (counter drift, orphaned attachment rows).

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use crate::db::Db;
use crate::store::{attachment, container, counters, task};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}

pub type Result<T> = std::result::Result<T, DoctorError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub check: &'static str,
    pub message: String,
    pub fixable: bool,
}

#[derive(Debug, Default)]
pub struct Report {
    pub findings: Vec<Finding>,
    pub fixed: Vec<String>,
}

impl Report {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }
}

const REQUIRED_TABLES: &[&str] =
    &["containers", "tasks", "actors", "comments", "relations", "attachments", "events", "counters", "sections"];

/// Run every check against `db`. When `attachments_root` is given, also scan
/// the attachment directory tree for files with no matching database row.
/// When `fix` is set, repairable findings (counter drift, orphaned
/// attachment rows) are corrected in place.
pub async fn run(db: &Db, attachments_root: Option<&Path>, fix: bool) -> Result<Report> {
    let mut report = Report::default();

    check_pragmas(db, &mut report).await?;
    check_required_tables(db, &mut report).await?;
    check_orphaned_tasks(db, &mut report).await?;
    check_duplicate_container_slugs(db, &mut report).await?;
    check_duplicate_task_slugs(db, &mut report).await?;
    check_orphaned_attachments(db, &mut report, fix).await?;
    check_counter_drift(db, &mut report, fix).await?;
    if let Some(root) = attachments_root {
        check_attachment_directory(db, root, &mut report).await?;
    }

    Ok(report)
}

async fn check_pragmas(db: &Db, report: &mut Report) -> Result<()> {
    let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(db.pool())
        .await
        .map_err(|e| DoctorError::Db(crate::db::DbError::Sqlx(e)))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        report.findings.push(Finding {
            severity: Severity::Warning,
            check: "pragmas",
            message: format!("journal_mode is {journal_mode}, expected wal"),
            fixable: false,
        });
    }

    let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
        .fetch_one(db.pool())
        .await
        .map_err(|e| DoctorError::Db(crate::db::DbError::Sqlx(e)))?;
    if foreign_keys == 0 {
        report.findings.push(Finding {
            severity: Severity::Error,
            check: "pragmas",
            message: "foreign_keys pragma is off".to_string(),
            fixable: false,
        });
    }

    Ok(())
}

async fn check_required_tables(db: &Db, report: &mut Report) -> Result<()> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(db.pool())
        .await
        .map_err(|e| DoctorError::Db(crate::db::DbError::Sqlx(e)))?;
    let present: HashSet<String> = rows.into_iter().map(|(n,)| n).collect();

    for table in REQUIRED_TABLES {
        if !present.contains(*table) {
            report.findings.push(Finding {
                severity: Severity::Error,
                check: "schema",
                message: format!("required table missing: {table}"),
                fixable: false,
            });
        }
    }
    Ok(())
}

async fn check_orphaned_tasks(db: &Db, report: &mut Report) -> Result<()> {
    let containers: HashSet<_> = container::list_all(db.pool()).await?.into_iter().map(|c| c.uuid).collect();
    for t in task::list_all(db.pool()).await? {
        if !containers.contains(&t.project_uuid) {
            report.findings.push(Finding {
                severity: Severity::Error,
                check: "referential-integrity",
                message: format!("task {} ({}) references missing project {}", t.friendly_id, t.uuid, t.project_uuid),
                fixable: false,
            });
        }
    }
    Ok(())
}

async fn check_duplicate_container_slugs(db: &Db, report: &mut Report) -> Result<()> {
    let mut seen: HashSet<(Option<uuid::Uuid>, String)> = HashSet::new();
    for c in container::list_all(db.pool()).await? {
        let key = (c.parent_uuid, c.slug.clone());
        if !seen.insert(key) {
            report.findings.push(Finding {
                severity: Severity::Error,
                check: "slug-uniqueness",
                message: format!("duplicate container slug {:?} under parent {:?}", c.slug, c.parent_uuid),
                fixable: false,
            });
        }
    }
    Ok(())
}

async fn check_duplicate_task_slugs(db: &Db, report: &mut Report) -> Result<()> {
    let mut seen: HashSet<(uuid::Uuid, String)> = HashSet::new();
    for t in task::list_all(db.pool()).await? {
        let key = (t.project_uuid, t.slug.clone());
        if !seen.insert(key) {
            report.findings.push(Finding {
                severity: Severity::Error,
                check: "slug-uniqueness",
                message: format!("duplicate task slug {:?} in project {}", t.slug, t.project_uuid),
                fixable: false,
            });
        }
    }
    Ok(())
}

async fn check_orphaned_attachments(db: &Db, report: &mut Report, fix: bool) -> Result<()> {
    let tasks: HashSet<_> = task::list_all(db.pool()).await?.into_iter().map(|t| t.uuid).collect();
    for a in attachment::list_all(db.pool()).await? {
        if !tasks.contains(&a.task_uuid) {
            report.findings.push(Finding {
                severity: Severity::Error,
                check: "referential-integrity",
                message: format!("attachment {} ({}) references missing task {}", a.friendly_id, a.uuid, a.task_uuid),
                fixable: true,
            });
            if fix {
                sqlx::query("DELETE FROM attachments WHERE uuid = ?1")
                    .bind(a.uuid.to_string())
                    .execute(db.pool())
                    .await
                    .map_err(|e| DoctorError::Db(crate::db::DbError::Sqlx(e)))?;
                report.fixed.push(format!("removed orphaned attachment row {}", a.uuid));
            }
        }
    }
    Ok(())
}

const COUNTER_KINDS: &[(&str, &str)] =
    &[("task", "T"), ("container", "P"), ("comment", "C"), ("attachment", "ATT"), ("actor", "AC")];

async fn check_counter_drift(db: &Db, report: &mut Report, fix: bool) -> Result<()> {
    for (kind, prefix) in COUNTER_KINDS {
        let max_seen = match *kind {
            "task" => task::list_all(db.pool()).await?.iter().filter_map(|t| numeric_suffix(&t.friendly_id)).max(),
            "container" => {
                container::list_all(db.pool()).await?.iter().filter_map(|c| numeric_suffix(&c.friendly_id)).max()
            }
            "attachment" => {
                attachment::list_all(db.pool()).await?.iter().filter_map(|a| numeric_suffix(&a.friendly_id)).max()
            }
            _ => None,
        };
        let Some(max_seen) = max_seen else { continue };
        let current = counters::current_value(db.pool(), kind).await?;
        if current < max_seen {
            report.findings.push(Finding {
                severity: Severity::Warning,
                check: "counter-drift",
                message: format!("{kind} counter ({prefix}) is {current}, but highest allocated id is {max_seen}"),
                fixable: true,
            });
            if fix {
                counters::set_value(db.pool(), kind, max_seen).await?;
                report.fixed.push(format!("resynced {kind} counter to {max_seen}"));
            }
        }
    }
    Ok(())
}

fn numeric_suffix(friendly_id: &str) -> Option<i64> {
    friendly_id.rsplit('-').next()?.parse().ok()
}

async fn check_attachment_directory(db: &Db, root: &Path, report: &mut Report) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    let known: HashSet<String> =
        attachment::list_all(db.pool()).await?.into_iter().map(|a| a.relative_path).collect();

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            if !known.contains(&relative) {
                report.findings.push(Finding {
                    severity: Severity::Warning,
                    check: "attachment-directory",
                    message: format!("file on disk with no attachment row: {relative}"),
                    fixable: false,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::container::{self, NewContainer};
    use crate::store::task::{self, NewTask};
    use flow_core::{ContainerKind, TaskKind};

    #[tokio::test]
    async fn clean_database_has_no_errors() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = container::create(
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
        .unwrap();
        task::create(
            &mut tx,
            NewTask {
                slug: "fix-bug".to_string(),
                title: "Fix the bug".to_string(),
                description: None,
                project_uuid: project.uuid,
                priority: 3,
                kind: TaskKind::Task,
                parent_task_uuid: None,
                created_by_actor: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let report = run(&db, None, false).await.unwrap();
        assert!(!report.has_errors());
    }

    #[tokio::test]
    async fn fix_resyncs_a_drifted_counter() {
        let db = Db::open_in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let project = container::create(
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
        .unwrap();
        task::create(
            &mut tx,
            NewTask {
                slug: "fix-bug".to_string(),
                title: "Fix the bug".to_string(),
                description: None,
                project_uuid: project.uuid,
                priority: 3,
                kind: TaskKind::Task,
                parent_task_uuid: None,
                created_by_actor: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        counters::set_value(db.pool(), "task", 0).await.unwrap();

        let report = run(&db, None, true).await.unwrap();
        assert!(report.fixed.iter().any(|m| m.contains("task counter")));
        let current = counters::current_value(db.pool(), "task").await.unwrap();
        assert_eq!(current, 1);
    }
}
