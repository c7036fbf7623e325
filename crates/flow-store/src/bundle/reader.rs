//! Reload a bundle directory for apply.

use std::path::Path;

use thiserror::Error;

use super::{split_front_matter, Manifest, TaskDocument, TaskFrontMatter, MACHINE_INTERFACE_VERSION};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("invalid document at {path}: {reason}")]
    Document { path: String, reason: String },
    #[error("bundle machine_interface_version {found} is incompatible with {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, ReaderError>;

pub fn read_manifest(bundle_dir: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(bundle_dir.join("manifest.json"))?;
    let manifest: Manifest =
        serde_json::from_str(&content).map_err(|e| ReaderError::Manifest(e.to_string()))?;
    if manifest.machine_interface_version != MACHINE_INTERFACE_VERSION {
        return Err(ReaderError::VersionMismatch {
            found: manifest.machine_interface_version,
            expected: MACHINE_INTERFACE_VERSION,
        });
    }
    Ok(manifest)
}

pub fn read_container_paths(bundle_dir: &Path) -> Result<Vec<String>> {
    let path = bundle_dir.join("containers.json");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| ReaderError::Manifest(e.to_string()))
}

/// Walk `tasks/` recursively, parsing every `.md` file into a [`TaskDocument`].
pub fn read_task_documents(bundle_dir: &Path) -> Result<Vec<TaskDocument>> {
    let tasks_dir = bundle_dir.join("tasks");
    if !tasks_dir.exists() {
        return Ok(Vec::new());
    }
    let mut documents = Vec::new();
    walk_markdown(&tasks_dir, &tasks_dir, &mut documents)?;
    Ok(documents)
}

fn walk_markdown(root: &Path, dir: &Path, out: &mut Vec<TaskDocument>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_markdown(root, &path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .with_extension("")
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read_to_string(&path)?;
        let (front_raw, body) = split_front_matter(&content).map_err(|reason| ReaderError::Document {
            path: relative.clone(),
            reason,
        })?;
        let front_matter: TaskFrontMatter =
            serde_yaml::from_str(front_raw).map_err(|e| ReaderError::Document {
                path: relative.clone(),
                reason: e.to_string(),
            })?;
        out.push(TaskDocument {
            path: relative,
            front_matter,
            body: body.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::writer::write_bundle;
    use crate::bundle::ExportFilter;
    use crate::db::Db;
    use crate::store::container::{self, NewContainer};
    use crate::store::task::{self, NewTask};
    use flow_core::{ContainerKind, TaskKind};
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_back_a_written_bundle() {
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
                description: Some("Body".to_string()),
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
        write_bundle(&db, dir.path(), ExportFilter::default()).await.unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest.ref_count, 1);

        let docs = read_task_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].front_matter.slug, "fix-bug");
        assert_eq!(docs[0].body.trim(), "Body");
    }
}
