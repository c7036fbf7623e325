//! RFC-6902-style structural patches between two JSON snapshots of a
//! project's reachable entity graph: create, validate, apply, rebase,
//! summarize.
//!
//! Snapshots are flat maps from a UUID-indexed pointer to a JSON value.
//! `/tasks/{uuid}` and `/containers/{uuid}` address a whole entity (used by
//! `add`/`remove`); `/tasks/{uuid}/{field}` addresses one field (used by
//! `replace`). Paths never contain friendly IDs, so a patch is stable across
//! re-numbering.

use std::collections::{BTreeMap, HashMap};

use flow_core::{FieldMap, TaskState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::Db;
use crate::resolver;
use crate::store::container::{self, NewContainer};
use crate::store::task::{self, NewTask};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] crate::resolver::ResolveError),
    #[error("malformed patch path: {0}")]
    MalformedPath(String),
    #[error("snapshot revision mismatch: expected {expected}, actual {actual}")]
    RevisionMismatch { expected: i64, actual: i64 },
    #[error("strict validation failed: {0}")]
    Strict(String),
}

pub type Result<T> = std::result::Result<T, PatchError>;

pub type Snapshot = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub base_revision: i64,
    pub ops: Vec<PatchOp>,
}

/// Build a flat snapshot of one project's containers and tasks, keyed by
/// UUID-indexed pointer.
pub async fn snapshot_project(db: &Db, project_path: &str) -> Result<Snapshot> {
    let project_uuid = resolver::walk_container_path(db.pool(), project_path).await?;
    let mut snapshot = Snapshot::new();

    let mut to_visit = vec![project_uuid];
    while let Some(uuid) = to_visit.pop() {
        if let Some(c) = container::get_by_uuid(db.pool(), uuid).await? {
            snapshot.insert(
                format!("/containers/{uuid}"),
                serde_json::json!({
                    "slug": c.slug,
                    "title": c.title,
                    "parent_uuid": c.parent_uuid,
                    "kind": c.kind.as_str(),
                }),
            );
        }
        let children = container::list_children(db.pool(), Some(uuid)).await?;
        to_visit.extend(children.iter().map(|c| c.uuid));

        for t in task::list_by_project(db.pool(), uuid).await? {
            snapshot.insert(
                format!("/tasks/{}", t.uuid),
                serde_json::json!({
                    "slug": t.slug,
                    "title": t.title,
                    "description": t.description,
                    "project_uuid": t.project_uuid,
                    "state": t.state.as_str(),
                    "priority": t.priority,
                    "parent_task_uuid": t.parent_task_uuid,
                    "labels": t.labels,
                }),
            );
        }
    }

    Ok(snapshot)
}

/// The current revision is the id of the most recent event row; used to
/// detect a live database drifting from the base a patch was created
/// against.
pub async fn current_revision(db: &Db) -> Result<i64> {
    let events = crate::journal::list_all(db.pool()).await.map_err(StoreError::Db)?;
    Ok(events.iter().map(|e| e.id).max().unwrap_or(0))
}

/// Compute the minimal sequence of ops transforming `from` into `to`.
pub fn create(from: &Snapshot, to: &Snapshot, base_revision: i64) -> Patch {
    let mut ops = Vec::new();

    for (path, value) in to {
        match from.get(path) {
            None => ops.push(PatchOp { op: OpKind::Add, path: path.clone(), value: Some(value.clone()) }),
            Some(existing) if existing != value => {
                if path.matches('/').count() == 2 {
                    // whole-entity replace: diff field by field instead of
                    // replacing the entire object, matching the pointer
                    // granularity `apply` expects for existing entities.
                    if let (Some(old_obj), Some(new_obj)) = (existing.as_object(), value.as_object()) {
                        for (field, new_value) in new_obj {
                            if old_obj.get(field) != Some(new_value) {
                                ops.push(PatchOp {
                                    op: OpKind::Replace,
                                    path: format!("{path}/{field}"),
                                    value: Some(new_value.clone()),
                                });
                            }
                        }
                        continue;
                    }
                }
                ops.push(PatchOp { op: OpKind::Replace, path: path.clone(), value: Some(value.clone()) });
            }
            _ => {}
        }
    }

    for path in from.keys() {
        if !to.contains_key(path) {
            ops.push(PatchOp { op: OpKind::Remove, path: path.clone(), value: None });
        }
    }

    ops.sort_by(|a, b| a.path.cmp(&b.path));
    Patch { base_revision, ops }
}

fn parse_path(path: &str) -> Result<(&str, Uuid, Option<&str>)> {
    let mut parts = path.trim_start_matches('/').split('/');
    let kind = parts.next().ok_or_else(|| PatchError::MalformedPath(path.to_string()))?;
    let uuid_str = parts.next().ok_or_else(|| PatchError::MalformedPath(path.to_string()))?;
    let uuid = Uuid::parse_str(uuid_str).map_err(|_| PatchError::MalformedPath(path.to_string()))?;
    let field = parts.next();
    Ok((kind, uuid, field))
}

/// One path's worth of domain-invariant check performed by `validate`.
fn check_invariant(kind: &str, field: Option<&str>, value: &serde_json::Value) -> std::result::Result<(), String> {
    match (kind, field) {
        ("tasks", Some("state")) => {
            let s = value.as_str().ok_or("state must be a string")?;
            if TaskState::parse(s).is_none() {
                return Err(format!("invalid task state: {s}"));
            }
        }
        ("tasks", Some("priority")) => {
            let p = value.as_i64().ok_or("priority must be an integer")?;
            if !(1..=4).contains(&p) {
                return Err(format!("priority out of range: {p}"));
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub violations: Vec<String>,
}

/// Apply `patch` in memory against `base` and check domain invariants.
pub fn validate(patch: &Patch, base: &Snapshot, strict: bool) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let mut working = base.clone();

    for op in &patch.ops {
        let (kind, _uuid, field) = parse_path(&op.path)?;
        if let Some(value) = &op.value {
            if let Err(reason) = check_invariant(kind, field, value) {
                report.violations.push(format!("{}: {reason}", op.path));
            }
        }
        match op.op {
            OpKind::Add | OpKind::Replace => {
                working.insert(op.path.clone(), op.value.clone().unwrap_or(serde_json::Value::Null));
            }
            OpKind::Remove => {
                working.remove(&op.path);
            }
        }
    }

    if strict && !report.violations.is_empty() {
        return Err(PatchError::Strict(report.violations.join("; ")));
    }
    Ok(report)
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub fields_changed: usize,
    pub entities_created: usize,
    pub entities_removed: usize,
}

/// Apply `patch` against the live database in a single transaction.
pub async fn apply(
    db: &Db,
    actor: Option<Uuid>,
    patch: &Patch,
    if_match: Option<i64>,
    dry_run: bool,
    strict: bool,
) -> Result<ApplyReport> {
    if let Some(expected) = if_match {
        let actual = current_revision(db).await?;
        if expected != actual {
            return Err(PatchError::RevisionMismatch { expected, actual });
        }
    }

    if strict {
        let base = Snapshot::new();
        validate(patch, &base, true)?;
    }

    let mut report = ApplyReport::default();
    let mut tx = db.begin().await.map_err(StoreError::Db)?;

    for op in &patch.ops {
        let (kind, uuid, field) = parse_path(&op.path)?;
        match (kind, field) {
            ("tasks", None) => match op.op {
                OpKind::Add => {
                    let value = op.value.as_ref().ok_or_else(|| PatchError::MalformedPath(op.path.clone()))?;
                    let project_uuid = value["project_uuid"]
                        .as_str()
                        .and_then(|s| Uuid::parse_str(s).ok())
                        .ok_or_else(|| PatchError::MalformedPath(op.path.clone()))?;
                    task::create(
                        &mut tx,
                        NewTask {
                            slug: value["slug"].as_str().unwrap_or_default().to_string(),
                            title: value["title"].as_str().unwrap_or_default().to_string(),
                            description: value["description"].as_str().map(str::to_string),
                            project_uuid,
                            priority: value["priority"].as_i64().unwrap_or(3) as i32,
                            kind: flow_core::TaskKind::Task,
                            parent_task_uuid: None,
                            created_by_actor: actor,
                        },
                    )
                    .await?;
                    report.entities_created += 1;
                }
                OpKind::Remove => {
                    let mut field_map = FieldMap::new();
                    field_map.insert("state".to_string(), serde_json::json!("deleted"));
                    task::update_fields(&mut tx, actor, uuid, &field_map, 0).await?;
                    report.entities_removed += 1;
                }
                OpKind::Replace => {}
            },
            ("tasks", Some(field_name)) => {
                let mut field_map = FieldMap::new();
                field_map.insert(field_name.to_string(), op.value.clone().unwrap_or(serde_json::Value::Null));
                task::update_fields(&mut tx, actor, uuid, &field_map, 0).await?;
                report.fields_changed += 1;
            }
            ("containers", None) => match op.op {
                OpKind::Add => {
                    let value = op.value.as_ref().ok_or_else(|| PatchError::MalformedPath(op.path.clone()))?;
                    let parent_uuid = value["parent_uuid"].as_str().and_then(|s| Uuid::parse_str(s).ok());
                    container::create(
                        &mut tx,
                        NewContainer {
                            slug: value["slug"].as_str().unwrap_or_default().to_string(),
                            title: value["title"].as_str().map(str::to_string),
                            parent_uuid,
                            kind: flow_core::ContainerKind::Project,
                            created_by_actor: actor,
                        },
                    )
                    .await?;
                    report.entities_created += 1;
                }
                OpKind::Remove => {
                    container::delete(&mut tx, actor, uuid).await?;
                    report.entities_removed += 1;
                }
                OpKind::Replace => {}
            },
            ("containers", Some(field_name)) => {
                let mut field_map = FieldMap::new();
                field_map.insert(field_name.to_string(), op.value.clone().unwrap_or(serde_json::Value::Null));
                container::update_fields(&mut tx, actor, uuid, &field_map, 0).await?;
                report.fields_changed += 1;
            }
            _ => return Err(PatchError::MalformedPath(op.path.clone())),
        }
    }

    if dry_run {
        tx.rollback().await.map_err(StoreError::Sqlx)?;
    } else {
        tx.commit().await.map_err(StoreError::Sqlx)?;
    }

    Ok(report)
}

#[derive(Debug, Default)]
pub struct RebaseReport {
    pub code_rewrites: BTreeMap<String, String>,
}

/// A container's identity independent of its own and its ancestors' UUIDs:
/// the chain of ancestor slugs below the project root, plus its own slug.
/// The root container itself (no in-scope ancestor) collapses to a sentinel
/// so that rebasing onto a differently-named project still matches it.
fn container_identities(snapshot: &Snapshot) -> HashMap<Uuid, String> {
    let mut slug_of: HashMap<Uuid, String> = HashMap::new();
    let mut parent_of: HashMap<Uuid, Option<Uuid>> = HashMap::new();
    for (path, value) in snapshot {
        let Ok(("containers", uuid, None)) = parse_path(path) else { continue };
        slug_of.insert(uuid, value.get("slug").and_then(|v| v.as_str()).unwrap_or_default().to_string());
        let parent = value.get("parent_uuid").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
        parent_of.insert(uuid, parent);
    }

    let mut identities = HashMap::new();
    for &uuid in slug_of.keys() {
        let mut chain = vec![slug_of[&uuid].clone()];
        let mut current = parent_of.get(&uuid).copied().flatten();
        let mut depth = 0;
        while let Some(parent) = current {
            depth += 1;
            let Some(slug) = slug_of.get(&parent) else { break };
            chain.push(slug.clone());
            if depth > 64 {
                break;
            }
            current = parent_of.get(&parent).copied().flatten();
        }
        chain.reverse();
        let identity = if chain.len() == 1 { "::root".to_string() } else { chain[1..].join("/") };
        identities.insert(uuid, identity);
    }
    identities
}

/// A task's identity independent of UUIDs: its owning container's identity
/// (from `container_identities`) plus the chain of ancestor task slugs
/// (for subtasks) and its own slug.
fn task_identities(snapshot: &Snapshot, container_identities: &HashMap<Uuid, String>) -> HashMap<Uuid, String> {
    let mut slug_of: HashMap<Uuid, String> = HashMap::new();
    let mut parent_of: HashMap<Uuid, Option<Uuid>> = HashMap::new();
    let mut project_of: HashMap<Uuid, Option<Uuid>> = HashMap::new();
    for (path, value) in snapshot {
        let Ok(("tasks", uuid, None)) = parse_path(path) else { continue };
        slug_of.insert(uuid, value.get("slug").and_then(|v| v.as_str()).unwrap_or_default().to_string());
        let parent = value.get("parent_task_uuid").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
        parent_of.insert(uuid, parent);
        let project = value.get("project_uuid").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
        project_of.insert(uuid, project);
    }

    let mut identities = HashMap::new();
    for &uuid in slug_of.keys() {
        let mut chain = vec![slug_of[&uuid].clone()];
        let mut current = parent_of.get(&uuid).copied().flatten();
        let mut depth = 0;
        while let Some(parent) = current {
            depth += 1;
            let Some(slug) = slug_of.get(&parent) else { break };
            chain.push(slug.clone());
            if depth > 64 {
                break;
            }
            current = parent_of.get(&parent).copied().flatten();
        }
        chain.reverse();
        let container_identity = project_of
            .get(&uuid)
            .copied()
            .flatten()
            .and_then(|p| container_identities.get(&p))
            .cloned()
            .unwrap_or_else(|| "::root".to_string());
        identities.insert(uuid, format!("{container_identity}::{}", chain.join("/")));
    }
    identities
}

/// Retarget `patch`'s UUID-addressed ops from `old_base` onto `new_base` by
/// matching entities on their `(kind, slug, parent)` identity rather than
/// UUID, since the two bases are different databases with different UUIDs
/// for "the same" entity.
pub fn rebase(patch: &Patch, old_base: &Snapshot, new_base: &Snapshot) -> Result<(Patch, RebaseReport)> {
    let old_containers = container_identities(old_base);
    let new_containers = container_identities(new_base);
    let new_containers_by_identity: HashMap<&str, Uuid> =
        new_containers.iter().map(|(uuid, identity)| (identity.as_str(), *uuid)).collect();

    let mut uuid_map: BTreeMap<Uuid, Uuid> = BTreeMap::new();
    for (&old_uuid, identity) in &old_containers {
        if let Some(&new_uuid) = new_containers_by_identity.get(identity.as_str()) {
            uuid_map.insert(old_uuid, new_uuid);
        }
    }

    let old_tasks = task_identities(old_base, &old_containers);
    let new_tasks = task_identities(new_base, &new_containers);
    let new_tasks_by_identity: HashMap<&str, Uuid> =
        new_tasks.iter().map(|(uuid, identity)| (identity.as_str(), *uuid)).collect();
    for (&old_uuid, identity) in &old_tasks {
        if let Some(&new_uuid) = new_tasks_by_identity.get(identity.as_str()) {
            uuid_map.insert(old_uuid, new_uuid);
        }
    }

    let mut report = RebaseReport::default();
    let mut rewritten_ops = Vec::with_capacity(patch.ops.len());
    for op in &patch.ops {
        let (kind, uuid, field) = parse_path(&op.path)?;
        let new_uuid = uuid_map.get(&uuid).copied().unwrap_or(uuid);
        if new_uuid != uuid {
            report.code_rewrites.insert(uuid.to_string(), new_uuid.to_string());
        }
        let path = match field {
            Some(f) => format!("/{kind}/{new_uuid}/{f}"),
            None => format!("/{kind}/{new_uuid}"),
        };
        rewritten_ops.push(PatchOp { op: op.op, path, value: op.value.clone() });
    }

    Ok((Patch { base_revision: patch.base_revision, ops: rewritten_ops }, report))
}

#[derive(Debug, Clone, Copy)]
pub enum SummaryFormat {
    Text,
    Markdown,
    Json,
}

/// Per-entity-kind op counts, optionally annotated with titles/slugs from
/// `base`.
pub fn summarize(patch: &Patch, base: Option<&Snapshot>, format: SummaryFormat) -> String {
    let mut counts: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
    for op in &patch.ops {
        let Ok((kind, uuid, field)) = parse_path(&op.path) else { continue };
        if field.is_some() {
            continue;
        }
        let entry = counts.entry(kind).or_default();
        match op.op {
            OpKind::Add => entry.0 += 1,
            OpKind::Replace => entry.1 += 1,
            OpKind::Remove => entry.2 += 1,
        }
        let _ = uuid;
    }
    // field-level replaces still count toward "replace" even without a
    // top-level entity op for that uuid.
    for op in &patch.ops {
        let Ok((kind, _uuid, Some(_field))) = parse_path(&op.path) else { continue };
        if matches!(op.op, OpKind::Replace) {
            counts.entry(kind).or_default().1 += 1;
        }
    }

    match format {
        SummaryFormat::Json => serde_json::json!(counts
            .iter()
            .map(|(k, (a, r, d))| (k.to_string(), serde_json::json!({"added": a, "replaced": r, "removed": d})))
            .collect::<BTreeMap<_, _>>())
        .to_string(),
        SummaryFormat::Markdown => {
            let mut out = String::from("| kind | added | replaced | removed |\n|---|---|---|---|\n");
            for (kind, (a, r, d)) in &counts {
                out.push_str(&format!("| {kind} | {a} | {r} | {d} |\n"));
            }
            let _ = base;
            out
        }
        SummaryFormat::Text => {
            let mut out = String::new();
            for (kind, (a, r, d)) in &counts {
                out.push_str(&format!("{kind}: +{a} ~{r} -{d}\n"));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::{ContainerKind, TaskKind};

    async fn seed(db: &Db) -> Uuid {
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
        t.uuid
    }

    #[tokio::test]
    async fn create_detects_a_field_level_change() {
        let db = Db::open_in_memory().await.unwrap();
        let task_uuid = seed(&db).await;
        let from = snapshot_project(&db, "demo").await.unwrap();

        let mut field_map = FieldMap::new();
        field_map.insert("priority".to_string(), serde_json::json!(1));
        let mut tx = db.begin().await.unwrap();
        task::update_fields(&mut tx, None, task_uuid, &field_map, 0).await.unwrap();
        tx.commit().await.unwrap();

        let to = snapshot_project(&db, "demo").await.unwrap();
        let patch = create(&from, &to, 0);
        assert!(patch
            .ops
            .iter()
            .any(|op| op.path == format!("/tasks/{task_uuid}/priority") && op.op == OpKind::Replace));
    }

    #[tokio::test]
    async fn apply_rejects_stale_revision() {
        let db = Db::open_in_memory().await.unwrap();
        seed(&db).await;
        let patch = Patch { base_revision: 0, ops: Vec::new() };
        let err = apply(&db, None, &patch, Some(999), false, false).await;
        assert!(matches!(err, Err(PatchError::RevisionMismatch { .. })));
    }

    #[test]
    fn summarize_counts_ops_per_kind() {
        let patch = Patch {
            base_revision: 0,
            ops: vec![PatchOp {
                op: OpKind::Replace,
                path: format!("/tasks/{}/priority", Uuid::new_v4()),
                value: Some(serde_json::json!(2)),
            }],
        };
        let text = summarize(&patch, None, SummaryFormat::Text);
        assert!(text.contains("tasks: +0 ~1 -0"));
    }
}
