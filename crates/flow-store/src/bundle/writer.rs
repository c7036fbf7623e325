//! Serialize a filtered slice of the database into a bundle directory.

use std::path::Path;

use thiserror::Error;

use super::{ExportFilter, Manifest, TaskFrontMatter, MACHINE_INTERFACE_VERSION};
use crate::db::Db;
use crate::store::{attachment, container, task};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Db(#[from] crate::db::DbError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, WriterError>;

fn path_matches(path: &str, filter: &ExportFilter) -> bool {
    if filter.path_prefixes.is_empty() && filter.project.is_none() {
        return true;
    }
    if let Some(project) = &filter.project {
        if path == *project || path.starts_with(&format!("{project}/")) {
            return true;
        }
    }
    filter
        .path_prefixes
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

fn touched_by_actor_or_window(
    task: &flow_core::Task,
    filter: &ExportFilter,
) -> bool {
    if let Some(actor) = filter.actor {
        if task.created_by_actor != Some(actor) && task.updated_by_actor != Some(actor) {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if task.updated_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if task.updated_at >= until {
            return false;
        }
    }
    true
}

/// Export every task that matches `filter` into `out_dir`, alongside the
/// container hierarchy needed to reproduce their paths.
pub async fn write_bundle(db: &Db, out_dir: &Path, filter: ExportFilter) -> Result<Manifest> {
    std::fs::create_dir_all(out_dir.join("tasks"))?;

    let all_containers = container::list_all(db.pool()).await?;
    let all_tasks = task::list_all(db.pool()).await?;

    let mut selected_tasks = Vec::new();
    let mut selected_paths = std::collections::BTreeSet::new();

    for t in &all_tasks {
        let project_path = container::path_of(db.pool(), t.project_uuid).await?;
        let full_path = flow_core::normalize::join_path(&project_path, &t.slug);
        if !path_matches(&full_path, &filter) || !touched_by_actor_or_window(t, &filter) {
            continue;
        }
        selected_paths.insert(project_path.clone());
        write_task_document(out_dir, &project_path, t)?;
        selected_tasks.push((full_path, t.clone()));
    }

    let container_paths: Vec<String> = all_containers
        .iter()
        .filter(|c| selected_paths.iter().any(|p| p == &c.slug || p.starts_with(&format!("{}/", c.slug))))
        .map(|c| c.slug.clone())
        .collect();
    let containers_json = serde_json::to_string_pretty(&selected_paths.iter().collect::<Vec<_>>())
        .map_err(|e| WriterError::Serialize(e.to_string()))?;
    std::fs::write(out_dir.join("containers.json"), containers_json)?;
    let _ = container_paths;

    if filter.with_events {
        let mut ndjson = String::new();
        for (_, t) in &selected_tasks {
            for event in crate::journal::list_for_resource(db.pool(), t.uuid).await? {
                ndjson.push_str(&serde_json::to_string(&event).map_err(|e| WriterError::Serialize(e.to_string()))?);
                ndjson.push('\n');
            }
        }
        std::fs::write(out_dir.join("events.ndjson"), ndjson)?;
    }

    if filter.with_attachments {
        for (_, t) in &selected_tasks {
            let attachments = attachment::list_for_task(db.pool(), t.uuid).await?;
            if attachments.is_empty() {
                continue;
            }
            let dir = out_dir.join("attachments").join(t.uuid.to_string());
            std::fs::create_dir_all(&dir)?;
            // Caller copies actual file bytes separately; this module only
            // records the attachment manifest entries under the task's
            // directory by touching empty placeholders when none exist yet.
            for att in attachments {
                let marker = dir.join(format!("{}.ref", att.filename));
                if !marker.exists() {
                    std::fs::write(&marker, att.relative_path.as_bytes())?;
                }
            }
        }
    }

    let manifest = Manifest {
        machine_interface_version: MACHINE_INTERFACE_VERSION,
        actor: filter.actor.map(|u| u.to_string()),
        since: filter.since,
        until: filter.until,
        since_cursor: None,
        project: filter.project.clone(),
        path_prefixes: filter.path_prefixes.clone(),
        with_attachments: filter.with_attachments,
        with_events: filter.with_events,
        include_refs: false,
        ref_count: selected_tasks.len(),
        version: 1,
        commit: None,
        build_date: None,
    };
    std::fs::write(
        out_dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest).map_err(|e| WriterError::Serialize(e.to_string()))?,
    )?;

    Ok(manifest)
}

fn write_task_document(out_dir: &Path, project_path: &str, t: &flow_core::Task) -> Result<()> {
    let front = TaskFrontMatter {
        id: t.friendly_id.clone(),
        uuid: Some(t.uuid),
        slug: t.slug.clone(),
        title: t.title.clone(),
        state: t.state.as_str().to_string(),
        priority: t.priority,
        due_at: t.due_at,
        start_at: t.start_at,
        labels: t.labels.clone(),
        etag: t.version,
        created_at: t.created_at,
        updated_at: t.updated_at,
        completed_at: t.completed_at,
        archived_at: t.archived_at,
        created_by: t.created_by_actor,
        updated_by: t.updated_by_actor,
    };
    let body = t.description.clone().unwrap_or_default();
    let document = super::render_document(&front, &body).map_err(WriterError::Serialize)?;

    let rel_path = flow_core::normalize::join_path(project_path, &t.slug);
    let file_path = out_dir.join("tasks").join(format!("{rel_path}.md"));
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(file_path, document)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::container::NewContainer;
    use crate::store::task::NewTask;
    use flow_core::{ContainerKind, TaskKind};
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_manifest_and_task_document() {
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
                description: Some("Steps to reproduce.".to_string()),
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

        let dir = tempdir().unwrap();
        let manifest = write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();
        assert_eq!(manifest.ref_count, 1);
        assert!(dir.path().join("tasks/demo/fix-bug.md").exists());
        assert!(dir.path().join("manifest.json").exists());
    }
}
