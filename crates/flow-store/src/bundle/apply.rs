//! Reintegrate a bundle into a canonical database.

use std::path::Path;

use similar::TextDiff;
use thiserror::Error;
use uuid::Uuid;

use super::reader::{self, ReaderError};
use super::TaskDocument;
use crate::db::Db;
use crate::store::container;
use crate::store::task::{self, NewTask};
use crate::store::StoreError;
use flow_core::{FieldChange, FieldMap, TaskKind, TaskState};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ApplyError>;

#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Created { uuid: Uuid },
    Updated { uuid: Uuid, new_version: i64 },
    Unchanged { uuid: Uuid },
    Conflict(Conflict),
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub path: String,
    pub uuid: Option<Uuid>,
    pub reason: &'static str,
    pub expected_etag: Option<i64>,
    pub actual_etag: Option<i64>,
    pub field_changes: Vec<FieldChange>,
    pub description_diff: Option<String>,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
}

fn unified_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .to_string()
}

/// Apply every task document in `bundle_dir` against `db`. `transactional`
/// selects all-or-nothing vs. per-document best-effort application;
/// `continue_on_error` only takes effect in best-effort mode.
pub async fn apply_bundle(
    db: &Db,
    actor: Option<Uuid>,
    bundle_dir: &Path,
    transactional: bool,
    continue_on_error: bool,
) -> Result<ApplyReport> {
    let manifest = reader::read_manifest(bundle_dir)?;
    let container_paths = reader::read_container_paths(bundle_dir)?;
    let documents = reader::read_task_documents(bundle_dir)?;
    let mut report = ApplyReport::default();
    let mut applied_uuids = Vec::new();

    if transactional {
        let mut tx = db.begin().await.map_err(StoreError::Db)?;
        for path in &container_paths {
            container::ensure_path(&mut tx, actor, path).await?;
        }
        for document in &documents {
            match apply_document_tx(&mut tx, actor, document).await? {
                ApplyOutcome::Created { uuid } => {
                    report.created += 1;
                    applied_uuids.push(uuid);
                }
                ApplyOutcome::Updated { uuid, .. } => {
                    report.updated += 1;
                    applied_uuids.push(uuid);
                }
                ApplyOutcome::Unchanged { uuid } => applied_uuids.push(uuid),
                ApplyOutcome::Conflict(c) => report.conflicts.push(c),
            }
        }
        if report.conflicts.is_empty() {
            tx.commit().await.map_err(StoreError::Sqlx)?;
        } else {
            tx.rollback().await.map_err(StoreError::Sqlx)?;
            applied_uuids.clear();
            report.created = 0;
            report.updated = 0;
        }
    } else {
        let mut tx = db.begin().await.map_err(StoreError::Db)?;
        for path in &container_paths {
            container::ensure_path(&mut tx, actor, path).await?;
        }
        tx.commit().await.map_err(StoreError::Sqlx)?;

        for document in &documents {
            let mut tx = db.begin().await.map_err(StoreError::Db)?;
            match apply_document_tx(&mut tx, actor, document).await {
                Ok(ApplyOutcome::Created { uuid }) => {
                    tx.commit().await.map_err(StoreError::Sqlx)?;
                    report.created += 1;
                    applied_uuids.push(uuid);
                }
                Ok(ApplyOutcome::Updated { uuid, .. }) => {
                    tx.commit().await.map_err(StoreError::Sqlx)?;
                    report.updated += 1;
                    applied_uuids.push(uuid);
                }
                Ok(ApplyOutcome::Unchanged { uuid }) => {
                    tx.commit().await.map_err(StoreError::Sqlx)?;
                    applied_uuids.push(uuid);
                }
                Ok(ApplyOutcome::Conflict(c)) => {
                    tx.rollback().await.map_err(StoreError::Sqlx)?;
                    report.conflicts.push(c);
                }
                Err(e) => {
                    tx.rollback().await.map_err(StoreError::Sqlx)?;
                    report.errors.push(e.to_string());
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
    }

    if manifest.with_attachments {
        for uuid in &applied_uuids {
            reattach_files(db, actor, *uuid, bundle_dir).await?;
        }
    }

    Ok(report)
}

async fn apply_document_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    actor: Option<Uuid>,
    document: &TaskDocument,
) -> Result<ApplyOutcome> {
    let state = TaskState::parse(&document.front_matter.state)
        .ok_or_else(|| StoreError::StateInvalid(document.front_matter.state.clone()))?;
    if !(1..=4).contains(&document.front_matter.priority) {
        return Err(StoreError::PriorityInvalid(document.front_matter.priority.to_string()).into());
    }

    let by_uuid = match document.front_matter.uuid {
        Some(uuid) => task::get_by_uuid(&mut **tx, uuid).await?,
        None => None,
    };

    let (parent_path, slug) = document
        .path
        .rsplit_once('/')
        .map(|(p, s)| (p.to_string(), s.to_string()))
        .unwrap_or_else(|| (String::new(), document.path.clone()));

    let project_uuid = if parent_path.is_empty() {
        None
    } else {
        let mut parent = None;
        for segment in flow_core::normalize::split_path(&parent_path) {
            parent = container::get_by_parent_slug(&mut **tx, parent, &segment).await?.map(|c| c.uuid);
            if parent.is_none() {
                break;
            }
        }
        parent
    };

    let by_path = match project_uuid {
        Some(project_uuid) => task::get_by_project_slug(&mut **tx, project_uuid, &slug).await?,
        None => None,
    };

    if let (Some(by_uuid), Some(by_path)) = (&by_uuid, &by_path) {
        if by_uuid.uuid != by_path.uuid {
            return Ok(ApplyOutcome::Conflict(Conflict {
                path: document.path.clone(),
                uuid: document.front_matter.uuid,
                reason: "uuid_mismatch",
                expected_etag: None,
                actual_etag: None,
                field_changes: Vec::new(),
                description_diff: None,
            }));
        }
    }

    let current = by_uuid.or(by_path);

    let Some(current) = current else {
        let Some(project_uuid) = project_uuid else {
            return Err(StoreError::NotFound { kind: "container", uuid: parent_path }.into());
        };
        let created = task::create(
            tx,
            NewTask {
                slug,
                title: document.front_matter.title.clone(),
                description: Some(document.body.clone()),
                project_uuid,
                priority: document.front_matter.priority,
                kind: TaskKind::Task,
                parent_task_uuid: None,
                created_by_actor: actor,
            },
        )
        .await?;
        return Ok(ApplyOutcome::Created { uuid: created.uuid });
    };

    if document.front_matter.etag > 0 && document.front_matter.etag != current.version {
        let mut field_changes = Vec::new();
        if current.title != document.front_matter.title {
            field_changes.push(FieldChange {
                field: "title".to_string(),
                current: serde_json::json!(current.title),
                incoming: serde_json::json!(document.front_matter.title),
            });
        }
        if current.state.as_str() != document.front_matter.state {
            field_changes.push(FieldChange {
                field: "state".to_string(),
                current: serde_json::json!(current.state.as_str()),
                incoming: serde_json::json!(document.front_matter.state),
            });
        }
        let description_diff = current.description.as_deref().map(|old| {
            unified_diff(old, &document.body)
        });

        return Ok(ApplyOutcome::Conflict(Conflict {
            path: document.path.clone(),
            uuid: Some(current.uuid),
            reason: "etag_mismatch",
            expected_etag: Some(document.front_matter.etag),
            actual_etag: Some(current.version),
            field_changes,
            description_diff,
        }));
    }

    let incoming_body = if document.body.is_empty() { None } else { Some(document.body.as_str()) };
    let title_changed = current.title != document.front_matter.title;
    let state_changed = current.state.as_str() != document.front_matter.state;
    let priority_changed = current.priority != document.front_matter.priority;
    let description_changed = current.description.as_deref() != incoming_body;
    let labels_changed = current.labels != document.front_matter.labels;
    let due_at_changed = current.due_at != document.front_matter.due_at;
    let start_at_changed = current.start_at != document.front_matter.start_at;

    if !(title_changed
        || state_changed
        || priority_changed
        || description_changed
        || labels_changed
        || due_at_changed
        || start_at_changed)
    {
        return Ok(ApplyOutcome::Unchanged { uuid: current.uuid });
    }

    let mut field_map = FieldMap::new();
    if title_changed {
        field_map.insert("title".to_string(), serde_json::json!(document.front_matter.title));
    }
    if state_changed {
        field_map.insert("state".to_string(), serde_json::json!(document.front_matter.state));
    }
    if priority_changed {
        field_map.insert("priority".to_string(), serde_json::json!(document.front_matter.priority));
    }
    if description_changed {
        field_map.insert("description".to_string(), serde_json::json!(document.body));
    }
    if labels_changed {
        field_map.insert("labels".to_string(), serde_json::json!(document.front_matter.labels));
    }
    if due_at_changed {
        field_map.insert(
            "due_at".to_string(),
            serde_json::json!(document.front_matter.due_at.map(|d| d.to_rfc3339())),
        );
    }
    if start_at_changed {
        field_map.insert(
            "start_at".to_string(),
            serde_json::json!(document.front_matter.start_at.map(|d| d.to_rfc3339())),
        );
    }

    let outcome = task::update_fields(tx, actor, current.uuid, &field_map, 0).await?;
    Ok(ApplyOutcome::Updated { uuid: current.uuid, new_version: outcome.new_version })
}

/// Reattach a bundle's attachment files for `task_uuid` directly through the
/// store, skipping any external subprocess. Called only after a successful
/// apply and only when the bundle's manifest requested attachments.
pub async fn reattach_files(
    db: &Db,
    actor: Option<Uuid>,
    task_uuid: Uuid,
    bundle_dir: &Path,
) -> Result<()> {
    let attachments_dir = bundle_dir.join("attachments").join(task_uuid.to_string());
    if !attachments_dir.exists() {
        return Ok(());
    }
    let mut tx = db.begin().await.map_err(StoreError::Db)?;
    for entry in std::fs::read_dir(&attachments_dir).map_err(|e| StoreError::Db(crate::db::DbError::Io(e)))? {
        let entry = entry.map_err(|e| StoreError::Db(crate::db::DbError::Io(e)))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ref") {
            continue;
        }
        let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let bytes = std::fs::read(&path).map_err(|e| StoreError::Db(crate::db::DbError::Io(e)))?;
        let checksum = {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };
        let relative_path = format!("{task_uuid}/{filename}");
        if crate::store::attachment::get_by_relative_path(&mut *tx, &relative_path).await?.is_some() {
            continue;
        }
        crate::store::attachment::create(
            &mut tx,
            actor,
            crate::store::attachment::NewAttachment {
                task_uuid,
                filename,
                relative_path,
                mime_type: None,
                size_bytes: bytes.len() as i64,
                checksum: Some(checksum),
            },
        )
        .await?;
    }
    tx.commit().await.map_err(StoreError::Sqlx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::writer::write_bundle;
    use crate::bundle::ExportFilter;
    use crate::store::container::NewContainer;
    use flow_core::ContainerKind;
    use tempfile::tempdir;

    async fn seed_db_with_task(db: &Db) -> Uuid {
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
        let t = task::create(
            &mut tx,
            NewTask {
                slug: "fix-bug".to_string(),
                title: "Fix the bug".to_string(),
                description: Some("Original body".to_string()),
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
        t.uuid
    }

    #[tokio::test]
    async fn reapplying_an_unchanged_bundle_is_a_no_op_conflict_free() {
        let db = Db::open_in_memory().await.unwrap();
        seed_db_with_task(&db).await;

        let dir = tempdir().unwrap();
        write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();

        let first = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
        assert_eq!(first.conflicts.len(), 0);
        assert_eq!(first.updated, 0);

        let second = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
        assert_eq!(second.conflicts.len(), 0);
        assert_eq!(second.updated, 0);
    }

    #[tokio::test]
    async fn stale_etag_is_reported_as_a_conflict_without_writing() {
        let db = Db::open_in_memory().await.unwrap();
        let task_uuid = seed_db_with_task(&db).await;

        let dir = tempdir().unwrap();
        write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("priority".to_string(), serde_json::json!(2));
        let mut tx = db.begin().await.unwrap();
        task::update_fields(&mut tx, None, task_uuid, &field_map, 0).await.unwrap();
        tx.commit().await.unwrap();

        let report = apply_bundle(&db, None, dir.path(), true, false).await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].reason, "etag_mismatch");

        let row = task::get_by_uuid(db.pool(), task_uuid).await.unwrap().unwrap();
        assert_eq!(row.priority, 2);
    }
}
