//! Import one project subtree from a source database into a destination
//! database at a specified prefix, resolving slug collisions and actor
//! aliasing across the two databases.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flow_core::ContainerKind;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Db;
use crate::resolver::{self, ResolveError};
use crate::store::actor::{self, NewActor};
use crate::store::attachment::{self, NewAttachment};
use crate::store::comment::{self, NewComment};
use crate::store::container::{self, NewContainer};
use crate::store::counters;
use crate::store::relation;
use crate::store::section::{self, NewSection};
use crate::store::task::{self, NewTask};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("source project not found: {0}")]
    SourceNotFound(String),
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// A rename applied during merge to resolve a `(parent, slug)` collision.
#[derive(Debug, Clone)]
pub struct Rename {
    pub kind: &'static str,
    pub from_slug: String,
    pub to_slug: String,
}

/// An actor whose source and destination rows disagree on uuid or role.
#[derive(Debug, Clone)]
pub struct ActorMismatch {
    pub slug: String,
    pub source_uuid: Uuid,
    pub dest_uuid: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub containers_merged: usize,
    pub sections_merged: usize,
    pub tasks_merged: usize,
    pub actors_merged: usize,
    pub comments_merged: usize,
    pub relations_merged: usize,
    pub attachments_merged: usize,
    pub renames: Vec<Rename>,
    pub actor_mismatches: Vec<ActorMismatch>,
    pub dropped_parents: Vec<String>,
    pub attachment_conflicts: Vec<String>,
    pub counters_fixed: Vec<String>,
    pub dry_run: bool,
}

/// `source_updated_at > dest_updated_at`, falling back to version on a tie or
/// unparsable timestamp.
fn source_is_newer(
    source_updated_at: DateTime<Utc>,
    source_version: i64,
    dest_updated_at: DateTime<Utc>,
    dest_version: i64,
) -> bool {
    if source_updated_at != dest_updated_at {
        return source_updated_at > dest_updated_at;
    }
    source_version > dest_version
}

async fn unique_container_slug(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    parent: Option<Uuid>,
    base: &str,
) -> Result<(String, Option<Rename>)> {
    if container::get_by_parent_slug(&mut **tx, parent, base).await?.is_none() {
        return Ok((base.to_string(), None));
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}--dup-{n}");
        if container::get_by_parent_slug(&mut **tx, parent, &candidate).await?.is_none() {
            return Ok((
                candidate.clone(),
                Some(Rename { kind: "container", from_slug: base.to_string(), to_slug: candidate }),
            ));
        }
        n += 1;
    }
}

/// Sections have no `updated_at`/`version` to compare, so unlike containers
/// and tasks there is no update-iff-newer branch: collisions are resolved by
/// the same `--dup-N` renaming, in memory against the slugs already known to
/// exist in the destination project.
fn unique_section_slug(existing: &HashSet<String>, base: &str) -> (String, Option<Rename>) {
    if !existing.contains(base) {
        return (base.to_string(), None);
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}--dup-{n}");
        if !existing.contains(&candidate) {
            return (
                candidate.clone(),
                Some(Rename { kind: "section", from_slug: base.to_string(), to_slug: candidate }),
            );
        }
        n += 1;
    }
}

async fn unique_task_slug(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    project_uuid: Uuid,
    base: &str,
) -> Result<(String, Option<Rename>)> {
    if task::get_by_project_slug(&mut **tx, project_uuid, base).await?.is_none() {
        return Ok((base.to_string(), None));
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}--dup-{n}");
        if task::get_by_project_slug(&mut **tx, project_uuid, &candidate).await?.is_none() {
            return Ok((
                candidate.clone(),
                Some(Rename { kind: "task", from_slug: base.to_string(), to_slug: candidate }),
            ));
        }
        n += 1;
    }
}

/// Import `source_project_path` from `source` into `dest` under
/// `dest_prefix_path`. `dry_run` runs the full pipeline against a cloned
/// transaction that is always rolled back. `source_attachments_root` and
/// `dest_attachments_root`, when both given, let step 8 stage attachment
/// file copies alongside the metadata rows; with either absent, attachments
/// merge at the row level only.
pub async fn merge_project(
    source: &Db,
    dest: &Db,
    source_project_path: &str,
    dest_prefix_path: &str,
    actor: Option<Uuid>,
    source_attachments_root: Option<&Path>,
    dest_attachments_root: Option<&Path>,
    dry_run: bool,
) -> Result<MergeReport> {
    let mut report = MergeReport { dry_run, ..Default::default() };

    let source_project_uuid = resolver::walk_container_path(source.pool(), source_project_path)
        .await
        .map_err(|_| MergeError::SourceNotFound(source_project_path.to_string()))?;

    let mut dest_tx = dest.begin().await.map_err(StoreError::Db)?;

    let dest_parent = if dest_prefix_path.is_empty() {
        None
    } else {
        Some(container::ensure_path(&mut dest_tx, actor, dest_prefix_path).await?)
    };

    // Actors: match by slug, then by uuid, else insert.
    let source_actors = actor::list(source.pool()).await?;
    let mut actor_map: HashMap<Uuid, Uuid> = HashMap::new();
    for source_actor in &source_actors {
        if let Some(dest_actor) = actor::get_by_slug(&mut *dest_tx, &source_actor.slug).await? {
            if dest_actor.uuid != source_actor.uuid || dest_actor.role != source_actor.role {
                report.actor_mismatches.push(ActorMismatch {
                    slug: source_actor.slug.clone(),
                    source_uuid: source_actor.uuid,
                    dest_uuid: dest_actor.uuid,
                });
            }
            actor_map.insert(source_actor.uuid, dest_actor.uuid);
            continue;
        }
        if let Some(dest_actor) = actor::get_by_uuid(&mut *dest_tx, source_actor.uuid).await? {
            actor_map.insert(source_actor.uuid, dest_actor.uuid);
            continue;
        }
        let created = actor::create(
            &mut dest_tx,
            NewActor {
                slug: source_actor.slug.clone(),
                display_name: source_actor.display_name.clone(),
                role: source_actor.role,
            },
        )
        .await?;
        actor_map.insert(source_actor.uuid, created.uuid);
        report.actors_merged += 1;
    }
    // Containers, outer-first: a breadth-first walk from the project root
    // visits every ancestor before its children.
    let mut container_map: HashMap<Uuid, Uuid> = HashMap::new();
    let mut to_visit = vec![source_project_uuid];
    let mut subtree = Vec::new();
    while let Some(uuid) = to_visit.pop() {
        if let Some(c) = container::get_by_uuid(source.pool(), uuid).await? {
            subtree.push(c);
        }
        let children = container::list_children(source.pool(), Some(uuid)).await?;
        to_visit.extend(children.iter().map(|c| c.uuid));
    }

    for source_container in &subtree {
        let mapped_parent = if source_container.uuid == source_project_uuid {
            dest_parent
        } else {
            source_container.parent_uuid.and_then(|p| container_map.get(&p).copied())
        };

        if let Some(existing) = container::get_by_uuid(&mut *dest_tx, source_container.uuid).await? {
            if source_is_newer(
                source_container.updated_at,
                source_container.version,
                existing.updated_at,
                existing.version,
            ) {
                let mut field_map = flow_core::FieldMap::new();
                field_map.insert("title".to_string(), serde_json::json!(source_container.title));
                field_map.insert("kind".to_string(), serde_json::json!(source_container.kind));
                field_map.insert("sort_index".to_string(), serde_json::json!(source_container.sort_index));
                field_map.insert("archived_at".to_string(), serde_json::json!(source_container.archived_at));
                container::update_fields(&mut dest_tx, actor, existing.uuid, &field_map, 0).await?;
            }
            container_map.insert(source_container.uuid, existing.uuid);
            continue;
        }

        let (slug, rename) =
            unique_container_slug(&mut dest_tx, mapped_parent, &source_container.slug).await?;
        if let Some(rename) = rename {
            report.renames.push(rename);
        }

        let created = container::create(
            &mut dest_tx,
            NewContainer {
                slug,
                title: source_container.title.clone(),
                parent_uuid: mapped_parent,
                kind: source_container.kind,
                created_by_actor: actor,
            },
        )
        .await?;
        container_map.insert(source_container.uuid, created.uuid);
        report.containers_merged += 1;
    }

    // Sections: ensured by (project_uuid, slug), scoped to each merged project's
    // own destination container, with in-memory --dup-N renaming on collision.
    for source_container in &subtree {
        let Some(&dest_project) = container_map.get(&source_container.uuid) else { continue };
        let source_sections = section::list_for_project(source.pool(), source_container.uuid).await?;
        if source_sections.is_empty() {
            continue;
        }
        let mut existing_slugs: HashSet<String> = section::list_for_project(&mut *dest_tx, dest_project)
            .await?
            .into_iter()
            .map(|s| s.slug)
            .collect();
        for source_section in &source_sections {
            if existing_slugs.contains(&source_section.slug) {
                continue;
            }
            let (slug, rename) = unique_section_slug(&existing_slugs, &source_section.slug);
            if let Some(rename) = rename {
                report.renames.push(rename);
            }
            existing_slugs.insert(slug.clone());
            section::create(
                &mut dest_tx,
                NewSection {
                    project_uuid: dest_project,
                    slug,
                    title: source_section.title.clone(),
                    order_index: source_section.order_index,
                    role: source_section.role.clone(),
                    is_default: source_section.is_default,
                    wip_limit: source_section.wip_limit,
                },
            )
            .await?;
            report.sections_merged += 1;
        }
    }

    // Tasks, parent-first: process tasks with no parent before their children.
    let mut source_tasks = Vec::new();
    for source_container in &subtree {
        source_tasks.extend(task::list_by_project(source.pool(), source_container.uuid).await?);
    }
    let parent_by_uuid: HashMap<Uuid, Option<Uuid>> =
        source_tasks.iter().map(|t| (t.uuid, t.parent_task_uuid)).collect();
    fn task_depth(uuid: Uuid, parent_by_uuid: &HashMap<Uuid, Option<Uuid>>) -> usize {
        let mut depth = 0;
        let mut current = parent_by_uuid.get(&uuid).copied().flatten();
        while let Some(parent) = current {
            depth += 1;
            if depth > 64 {
                break;
            }
            current = parent_by_uuid.get(&parent).copied().flatten();
        }
        depth
    }
    let depth_of: HashMap<Uuid, usize> =
        source_tasks.iter().map(|t| (t.uuid, task_depth(t.uuid, &parent_by_uuid))).collect();
    source_tasks.sort_by_key(|t| depth_of[&t.uuid]);

    let mut task_map: HashMap<Uuid, Uuid> = HashMap::new();
    for source_task in &source_tasks {
        let Some(&dest_project) = container_map.get(&source_task.project_uuid) else {
            continue;
        };
        let parent_task_uuid = match source_task.parent_task_uuid {
            Some(parent) => match task_map.get(&parent) {
                Some(mapped) => Some(*mapped),
                None => {
                    report.dropped_parents.push(source_task.slug.clone());
                    None
                }
            },
            None => None,
        };

        if let Some(existing) = task::get_by_uuid(&mut *dest_tx, source_task.uuid).await? {
            if source_is_newer(
                source_task.updated_at,
                source_task.version,
                existing.updated_at,
                existing.version,
            ) {
                let mut field_map = flow_core::FieldMap::new();
                field_map.insert("title".to_string(), serde_json::json!(source_task.title));
                field_map.insert("description".to_string(), serde_json::json!(source_task.description));
                field_map.insert("priority".to_string(), serde_json::json!(source_task.priority));
                field_map.insert("kind".to_string(), serde_json::json!(source_task.kind));
                field_map.insert("state".to_string(), serde_json::json!(source_task.state));
                field_map.insert("labels".to_string(), serde_json::json!(source_task.labels));
                field_map.insert("due_at".to_string(), serde_json::json!(source_task.due_at));
                field_map.insert("start_at".to_string(), serde_json::json!(source_task.start_at));
                task::update_fields(&mut dest_tx, actor, existing.uuid, &field_map, 0).await?;
            }
            task_map.insert(source_task.uuid, existing.uuid);
            continue;
        }

        let (slug, rename) = unique_task_slug(&mut dest_tx, dest_project, &source_task.slug).await?;
        if let Some(rename) = rename {
            report.renames.push(rename);
        }

        let created = task::create(
            &mut dest_tx,
            NewTask {
                slug,
                title: source_task.title.clone(),
                description: source_task.description.clone(),
                project_uuid: dest_project,
                priority: source_task.priority,
                kind: source_task.kind,
                parent_task_uuid,
                created_by_actor: actor,
            },
        )
        .await?;
        task_map.insert(source_task.uuid, created.uuid);
        report.tasks_merged += 1;
    }

    // Comments and relations: skipped for any task that didn't merge (its
    // source row referenced a project outside the subtree, or was dropped).
    // Relations are deduped on (from, to, kind); each edge is only written
    // once even though list_for_task surfaces both endpoints of an edge.
    let mut seen_relations: HashSet<Uuid> = HashSet::new();
    for (&source_task_uuid, &dest_task_uuid) in &task_map {
        for source_comment in comment::list_for_task(source.pool(), source_task_uuid).await? {
            let Some(&dest_actor) = actor_map.get(&source_comment.actor_uuid) else { continue };
            comment::create(
                &mut dest_tx,
                NewComment { task_uuid: dest_task_uuid, actor_uuid: dest_actor, body: source_comment.body },
            )
            .await?;
            report.comments_merged += 1;
        }

        for source_relation in relation::list_for_task(source.pool(), source_task_uuid).await? {
            if !seen_relations.insert(source_relation.uuid) {
                continue;
            }
            let (Some(&dest_from), Some(&dest_to)) =
                (task_map.get(&source_relation.from_task), task_map.get(&source_relation.to_task))
            else {
                continue;
            };
            if relation::exists(&mut *dest_tx, dest_from, dest_to, &source_relation.kind).await? {
                continue;
            }
            relation::create(&mut dest_tx, actor, dest_from, dest_to, source_relation.kind).await?;
            report.relations_merged += 1;
        }
    }

    // Attachments: deduped by relative_path. A destination row at the same
    // relative_path with a matching checksum is treated as the same file and
    // left alone; a mismatched checksum is a conflict and is skipped. File
    // copies are staged here and only performed after the transaction below
    // commits, so a rolled-back merge never touches the filesystem.
    let mut staged_copies: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (&source_task_uuid, &dest_task_uuid) in &task_map {
        for source_attachment in attachment::list_for_task(source.pool(), source_task_uuid).await? {
            if let Some(existing) =
                attachment::get_by_relative_path(&mut *dest_tx, &source_attachment.relative_path).await?
            {
                if existing.checksum != source_attachment.checksum {
                    report.attachment_conflicts.push(source_attachment.relative_path.clone());
                }
                continue;
            }
            attachment::create(
                &mut dest_tx,
                actor,
                NewAttachment {
                    task_uuid: dest_task_uuid,
                    filename: source_attachment.filename.clone(),
                    relative_path: source_attachment.relative_path.clone(),
                    mime_type: source_attachment.mime_type.clone(),
                    size_bytes: source_attachment.size_bytes,
                    checksum: source_attachment.checksum.clone(),
                },
            )
            .await?;
            report.attachments_merged += 1;

            if let (Some(source_root), Some(dest_root)) = (source_attachments_root, dest_attachments_root) {
                staged_copies.push((
                    source_root.join(&source_attachment.relative_path),
                    dest_root.join(&source_attachment.relative_path),
                ));
            }
        }
    }

    // Counter drift: merge mints friendly ids through the normal counters
    // table, but a destination restored from an older bundle can still lag
    // behind the highest id actually present in its rows.
    const COUNTER_KINDS: &[(&str, &str)] = &[("task", "T"), ("container", "P"), ("attachment", "ATT")];
    for (kind, _) in COUNTER_KINDS {
        let max_seen = match *kind {
            "task" => task::list_all(&mut *dest_tx).await?.iter().filter_map(|t| numeric_suffix(&t.friendly_id)).max(),
            "container" => container::list_all(&mut *dest_tx)
                .await?
                .iter()
                .filter_map(|c| numeric_suffix(&c.friendly_id))
                .max(),
            "attachment" => attachment::list_all(&mut *dest_tx)
                .await?
                .iter()
                .filter_map(|a| numeric_suffix(&a.friendly_id))
                .max(),
            _ => None,
        };
        let Some(max_seen) = max_seen else { continue };
        let current = counters::current_value(&mut *dest_tx, kind).await?;
        if current < max_seen {
            counters::set_value(&mut *dest_tx, kind, max_seen).await?;
            report.counters_fixed.push(format!("resynced {kind} counter to {max_seen}"));
        }
    }

    if dry_run {
        dest_tx.rollback().await.map_err(StoreError::Sqlx)?;
        return Ok(report);
    }
    dest_tx.commit().await.map_err(StoreError::Sqlx)?;

    for (from, to) in staged_copies {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        std::fs::copy(&from, &to).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    Ok(report)
}

fn numeric_suffix(friendly_id: &str) -> Option<i64> {
    friendly_id.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::TaskKind;

    async fn seed_source() -> (Db, String) {
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
        (db, "demo".to_string())
    }

    #[tokio::test]
    async fn merges_a_project_subtree_into_an_empty_destination() {
        let (source, path) = seed_source().await;
        let dest = Db::open_in_memory().await.unwrap();

        let report =
            merge_project(&source, &dest, &path, "", None, None, None, false).await.unwrap();
        assert_eq!(report.containers_merged, 1);
        assert_eq!(report.tasks_merged, 1);

        let migrated = resolver::walk_container_path(dest.pool(), "demo").await.unwrap();
        let tasks = task::list_by_project(dest.pool(), migrated).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].slug, "fix-bug");
    }

    #[tokio::test]
    async fn dry_run_leaves_destination_untouched() {
        let (source, path) = seed_source().await;
        let dest = Db::open_in_memory().await.unwrap();

        let report =
            merge_project(&source, &dest, &path, "", None, None, None, true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.containers_merged, 1);

        let err = resolver::walk_container_path(dest.pool(), "demo").await;
        assert!(err.is_err());
    }
}
