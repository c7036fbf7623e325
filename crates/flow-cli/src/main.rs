//! Command-line client for the flow work-queue engine.
//!
//! A thin dispatcher over `flow-store`'s public API: every subcommand opens
//! the configured database, runs one or two store calls, prints a report,
//! and exits with the error taxonomy's exit code on failure.

mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flow_core::{ActorRole, Config, FieldMap, FlowError};
use flow_store::db::Db;
use flow_store::patch::{Patch, SummaryFormat};
use flow_store::resolver::{self, Prefer, Resolved};
use flow_store::store::{actor, container, task};
use flow_store::{bundle, doctor, merge, patch};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flow", about = "Command-line client for the flow work-queue engine")]
struct Cli {
    /// Path to an explicit config file, applied after `.flow/config`.
    #[arg(long, global = true, env = "FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path.
    #[arg(long, global = true, env = "FLOW_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Override the attachments directory.
    #[arg(long, global = true, env = "FLOW_ATTACHMENTS_DIR")]
    attachments_dir: Option<PathBuf>,

    /// Actor slug attributed to mutations made by this invocation.
    #[arg(long, global = true, env = "FLOW_ACTOR")]
    actor: Option<String>,

    /// Root path that bare path selectors are resolved relative to.
    #[arg(long, global = true, env = "FLOW_PROJECT_ROOT")]
    project_root: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a container at the given path.
    Mkdir {
        path: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "misc")]
        kind: String,
    },
    /// List the containers and tasks under a path (root if omitted).
    Ls {
        path: Option<String>,
    },
    /// Show the detail view of a container or task.
    Cat {
        selector: String,
    },
    /// Find tasks by a glob pattern against slug or title.
    Find {
        pattern: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Update fields on a container or task.
    Set {
        selector: String,
        /// One or more `field=value` pairs.
        #[arg(long = "set", required = true)]
        fields: Vec<String>,
        #[arg(long)]
        if_match: Option<i64>,
        /// Resolve `selector` as a container when it could be either.
        #[arg(long)]
        container: bool,
    },
    /// Move or rename one or more containers/tasks.
    Mv {
        sources: Vec<String>,
        dst: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Acknowledge one or more completed/cancelled tasks.
    Ack {
        tasks: Vec<String>,
        #[arg(long)]
        force: bool,
    },
    /// Integrity and relationship checks.
    Check {
        #[command(subcommand)]
        check: CheckCommand,
    },
    /// List root-level projects.
    Projects,
    /// Export or import a directory bundle.
    Bundle {
        #[command(subcommand)]
        bundle: BundleCommand,
    },
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        db: DbCommand,
    },
    /// Merge a project subtree from another database into this one.
    Merge {
        source_db: PathBuf,
        source_project: String,
        dest_project: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        source_attachments_root: Option<PathBuf>,
        #[arg(long)]
        dest_attachments_root: Option<PathBuf>,
    },
    /// Structural patches between project snapshots.
    Patch {
        #[command(subcommand)]
        patch: PatchCommand,
    },
    /// Run integrity checks against the database.
    Doctor {
        #[arg(long)]
        fix: bool,
        #[arg(long)]
        attachments_root: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CheckCommand {
    /// Show the tasks blocking a given task.
    Blocked { selector: String },
}

#[derive(Subcommand)]
enum BundleCommand {
    /// Write a directory bundle from the database.
    Create {
        out_dir: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        with_attachments: bool,
        #[arg(long)]
        with_events: bool,
    },
    /// Apply a directory bundle into the database.
    Apply {
        bundle_dir: PathBuf,
        #[arg(long)]
        transactional: bool,
        #[arg(long)]
        continue_on_error: bool,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Write a point-in-time copy of the database.
    Snapshot { dest: PathBuf },
}

#[derive(Subcommand)]
enum PatchCommand {
    /// Diff a saved base snapshot against the live project.
    Create {
        project: String,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Check a patch's ops against domain invariants.
    Validate {
        patch_file: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        strict: bool,
    },
    /// Apply a patch to the live database.
    Apply {
        patch_file: PathBuf,
        #[arg(long)]
        if_match: Option<i64>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Retarget a patch's entity references onto a different project subtree.
    Rebase {
        patch_file: PathBuf,
        #[arg(long)]
        old_project: String,
        #[arg(long)]
        new_project: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print a human-readable summary of a patch's ops.
    Summarize {
        patch_file: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = "text", value_parser = parse_summary_format)]
        format: SummaryFormat,
    },
}

fn parse_summary_format(s: &str) -> Result<SummaryFormat, String> {
    match s {
        "text" => Ok(SummaryFormat::Text),
        "markdown" => Ok(SummaryFormat::Markdown),
        "json" => Ok(SummaryFormat::Json),
        other => Err(format!("unknown summary format: {other}")),
    }
}

fn parse_field_value(raw: &str, field: &str) -> (String, serde_json::Value) {
    if field == "labels" {
        let labels: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).collect();
        return (field.to_string(), serde_json::json!(labels));
    }
    let value = if raw == "null" {
        serde_json::Value::Null
    } else if let Ok(n) = raw.parse::<i64>() {
        serde_json::json!(n)
    } else if raw == "true" || raw == "false" {
        serde_json::json!(raw == "true")
    } else {
        serde_json::json!(raw)
    };
    (field.to_string(), value)
}

fn parse_set_fields(pairs: &[String]) -> Result<FieldMap, FlowError> {
    let mut map = FieldMap::new();
    for pair in pairs {
        let (field, value) = pair
            .split_once('=')
            .ok_or_else(|| FlowError::Usage(format!("expected field=value, got {pair}")))?;
        let (field, value) = parse_field_value(value, field);
        map.insert(field, value);
    }
    Ok(map)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), FlowError> {
    let cwd = std::env::current_dir().map_err(|e| FlowError::IoError { path: ".".to_string(), cause: e.to_string() })?;
    let mut config = Config::resolve(&cwd, cli.config.as_deref())
        .map_err(|e| FlowError::Usage(e.to_string()))?;
    config.apply_overrides(cli.db_path, cli.attachments_dir, cli.actor, cli.project_root);

    let db = Db::open(&config.db_path)
        .await
        .map_err(|e| FlowError::IoError { path: config.db_path.display().to_string(), cause: e.to_string() })?;

    let actor_uuid = resolve_actor(&db, config.actor_id.as_deref()).await?;
    let project_root = config.project_root.as_deref();

    match cli.command {
        Command::Mkdir { path, title, kind } => run_mkdir(&db, actor_uuid, &path, title, &kind).await,
        Command::Ls { path } => run_ls(&db, project_root, path.as_deref()).await,
        Command::Cat { selector } => run_cat(&db, project_root, &selector).await,
        Command::Find { pattern, project } => run_find(&db, project_root, &pattern, project.as_deref()).await,
        Command::Set { selector, fields, if_match, container } => {
            run_set(&db, actor_uuid, project_root, &selector, &fields, if_match, container).await
        }
        Command::Mv { sources, dst, overwrite } => run_mv(&db, actor_uuid, &sources, &dst, overwrite).await,
        Command::Ack { tasks, force } => run_ack(&db, actor_uuid, project_root, &tasks, force).await,
        Command::Check { check: CheckCommand::Blocked { selector } } => {
            run_check_blocked(&db, project_root, &selector).await
        }
        Command::Projects => run_projects(&db).await,
        Command::Bundle { bundle: BundleCommand::Create { out_dir, project, with_attachments, with_events } } => {
            run_bundle_create(&db, &out_dir, project, with_attachments, with_events).await
        }
        Command::Bundle { bundle: BundleCommand::Apply { bundle_dir, transactional, continue_on_error } } => {
            run_bundle_apply(&db, actor_uuid, &bundle_dir, transactional, continue_on_error).await
        }
        Command::Db { db: DbCommand::Snapshot { dest } } => run_db_snapshot(&db, &dest).await,
        Command::Merge {
            source_db,
            source_project,
            dest_project,
            dry_run,
            source_attachments_root,
            dest_attachments_root,
        } => {
            run_merge(
                &db,
                &source_db,
                &source_project,
                &dest_project,
                actor_uuid,
                source_attachments_root,
                dest_attachments_root,
                dry_run,
            )
            .await
        }
        Command::Patch { patch: cmd } => run_patch(&db, actor_uuid, project_root, cmd).await,
        Command::Doctor { fix, attachments_root } => run_doctor(&db, attachments_root, fix).await,
    }
}

async fn resolve_actor(db: &Db, slug: Option<&str>) -> Result<Option<Uuid>, FlowError> {
    let Some(slug) = slug else { return Ok(None) };
    let mut tx = db.begin().await.map_err(|e| FlowError::Internal(e.to_string()))?;
    let resolved = actor::get_or_create_by_slug(&mut tx, slug, ActorRole::Human)
        .await
        .map_err(FlowError::from)?;
    tx.commit().await.map_err(|e| FlowError::Internal(e.to_string()))?;
    Ok(Some(resolved.uuid))
}

async fn run_mkdir(
    db: &Db,
    actor_uuid: Option<Uuid>,
    path: &str,
    title: Option<String>,
    kind: &str,
) -> Result<(), FlowError> {
    let kind = flow_core::ContainerKind::parse(kind).ok_or_else(|| FlowError::KindInvalid { value: kind.to_string() })?;
    let (parent_path, slug) = path
        .rsplit_once('/')
        .map(|(p, s)| (p.to_string(), s.to_string()))
        .unwrap_or_else(|| (String::new(), path.to_string()));
    let slug = flow_core::normalize_slug(&slug).map_err(|e| FlowError::SlugInvalid { input: e.to_string() })?;

    let parent_uuid = if parent_path.is_empty() {
        None
    } else {
        Some(resolver::walk_container_path(db.pool(), &parent_path).await?)
    };

    let mut tx = db.begin().await.map_err(|e| FlowError::Internal(e.to_string()))?;
    let created = container::create(
        &mut tx,
        container::NewContainer { slug, title, parent_uuid, kind, created_by_actor: actor_uuid },
    )
    .await
    .map_err(FlowError::from)?;
    tx.commit().await.map_err(|e| FlowError::Internal(e.to_string()))?;

    info!(container = %created.friendly_id, path, "created container");
    render::print_container_created(&created);
    Ok(())
}

async fn run_ls(db: &Db, project_root: Option<&str>, path: Option<&str>) -> Result<(), FlowError> {
    let parent_uuid = match path {
        Some(p) => {
            let effective = resolve_project_path(project_root, p);
            Some(resolver::walk_container_path(db.pool(), &effective).await?)
        }
        None => None,
    };

    let containers = container::list_children(db.pool(), parent_uuid)
        .await
        .map_err(FlowError::from)?;
    render::print_container_list(&containers);

    if let Some(project_uuid) = parent_uuid {
        let tasks = task::list_by_project(db.pool(), project_uuid).await.map_err(FlowError::from)?;
        println!();
        render::print_task_list(&tasks);
    }
    Ok(())
}

async fn run_cat(db: &Db, project_root: Option<&str>, selector: &str) -> Result<(), FlowError> {
    match resolver::resolve(db.pool(), selector, project_root, Prefer::Task).await? {
        Resolved::Task(uuid) => {
            let t = task::get_by_uuid(db.pool(), uuid)
                .await
                .map_err(FlowError::from)?
                .ok_or_else(|| FlowError::NotFound { selector: selector.to_string(), kind: "task".to_string() })?;
            let project_path = container::path_of(db.pool(), t.project_uuid).await.map_err(FlowError::from)?;
            let path = format!("{project_path}/{}", t.slug);
            let blockers = task::blocked_by(db.pool(), uuid).await.map_err(FlowError::from)?;
            render::print_task_detail(&t, &path, &blockers);
        }
        Resolved::Container(uuid) => {
            let c = container::get_by_uuid(db.pool(), uuid)
                .await
                .map_err(FlowError::from)?
                .ok_or_else(|| FlowError::NotFound { selector: selector.to_string(), kind: "container".to_string() })?;
            let path = container::path_of(db.pool(), uuid).await.map_err(FlowError::from)?;
            let children = container::list_children(db.pool(), Some(uuid)).await.map_err(FlowError::from)?;
            let tasks = task::list_by_project(db.pool(), uuid).await.map_err(FlowError::from)?;
            render::print_container_detail(&c, &path, &children, &tasks);
        }
    }
    Ok(())
}

async fn run_find(
    db: &Db,
    project_root: Option<&str>,
    pattern: &str,
    project: Option<&str>,
) -> Result<(), FlowError> {
    let project_uuid = match project {
        Some(p) => {
            let effective = resolve_project_path(project_root, p);
            Some(resolver::walk_container_path(db.pool(), &effective).await?)
        }
        None => None,
    };
    let pattern = flow_core::glob_to_sql_pattern(pattern);
    let tasks = task::find(db.pool(), &pattern, project_uuid).await.map_err(FlowError::from)?;
    render::print_task_list(&tasks);
    Ok(())
}

async fn run_set(
    db: &Db,
    actor_uuid: Option<Uuid>,
    project_root: Option<&str>,
    selector: &str,
    fields: &[String],
    if_match: Option<i64>,
    prefer_container: bool,
) -> Result<(), FlowError> {
    let field_map = parse_set_fields(fields)?;
    let prefer = if prefer_container { Prefer::Container } else { Prefer::Task };
    let resolved = resolver::resolve(db.pool(), selector, project_root, prefer).await?;

    let mut tx = db.begin().await.map_err(|e| FlowError::Internal(e.to_string()))?;
    match resolved {
        Resolved::Task(uuid) => {
            let outcome = task::update_fields(&mut tx, actor_uuid, uuid, &field_map, if_match.unwrap_or(0))
                .await
                .map_err(FlowError::from)?;
            tx.commit().await.map_err(|e| FlowError::Internal(e.to_string()))?;
            debug!(entity_kind = "task", %uuid, to_version = outcome.new_version, "updated fields");
            println!("Updated task {uuid}, etag now {}", outcome.new_version);
        }
        Resolved::Container(uuid) => {
            let outcome = container::update_fields(&mut tx, actor_uuid, uuid, &field_map, if_match.unwrap_or(0))
                .await
                .map_err(FlowError::from)?;
            tx.commit().await.map_err(|e| FlowError::Internal(e.to_string()))?;
            debug!(entity_kind = "container", %uuid, to_version = outcome.new_version, "updated fields");
            println!("Updated container {uuid}, etag now {}", outcome.new_version);
        }
    }
    Ok(())
}

async fn run_mv(
    db: &Db,
    actor_uuid: Option<Uuid>,
    sources: &[String],
    dst: &str,
    overwrite: bool,
) -> Result<(), FlowError> {
    flow_store::mutation::mv(db, actor_uuid, sources, dst, overwrite)
        .await
        .map_err(FlowError::from)?;
    println!("Moved {} item(s) to {dst}", sources.len());
    Ok(())
}

async fn run_ack(
    db: &Db,
    actor_uuid: Option<Uuid>,
    project_root: Option<&str>,
    selectors: &[String],
    force: bool,
) -> Result<(), FlowError> {
    let mut uuids = Vec::with_capacity(selectors.len());
    for selector in selectors {
        match resolver::resolve(db.pool(), selector, project_root, Prefer::Task).await? {
            Resolved::Task(uuid) => uuids.push(uuid),
            Resolved::Container(_) => {
                return Err(FlowError::Usage(format!("{selector} is a container, not a task")))
            }
        }
    }
    let report = flow_store::mutation::acknowledge(db, actor_uuid, &uuids, force)
        .await
        .map_err(FlowError::from)?;
    render::print_ack_report(&report);
    Ok(())
}

async fn run_check_blocked(db: &Db, project_root: Option<&str>, selector: &str) -> Result<(), FlowError> {
    let uuid = match resolver::resolve(db.pool(), selector, project_root, Prefer::Task).await? {
        Resolved::Task(uuid) => uuid,
        Resolved::Container(_) => return Err(FlowError::Usage(format!("{selector} is a container, not a task"))),
    };
    let blockers = task::blocked_by(db.pool(), uuid).await.map_err(FlowError::from)?;
    render::print_blocked(&blockers);
    Ok(())
}

async fn run_projects(db: &Db) -> Result<(), FlowError> {
    let all = container::list_all(db.pool()).await.map_err(FlowError::from)?;
    let roots: Vec<_> = all.into_iter().filter(|c| c.parent_uuid.is_none()).collect();
    render::print_container_list(&roots);
    Ok(())
}

async fn run_bundle_create(
    db: &Db,
    out_dir: &std::path::Path,
    project: Option<String>,
    with_attachments: bool,
    with_events: bool,
) -> Result<(), FlowError> {
    let filter = bundle::ExportFilter {
        project,
        with_attachments,
        with_events,
        ..Default::default()
    };
    let manifest = bundle::writer::write_bundle(db, out_dir, filter).await.map_err(FlowError::from)?;
    info!(out_dir = %out_dir.display(), tasks = manifest.ref_count, "wrote bundle");
    render::print_bundle_manifest(&manifest);
    Ok(())
}

async fn run_bundle_apply(
    db: &Db,
    actor_uuid: Option<Uuid>,
    bundle_dir: &std::path::Path,
    transactional: bool,
    continue_on_error: bool,
) -> Result<(), FlowError> {
    let report = bundle::apply::apply_bundle(db, actor_uuid, bundle_dir, transactional, continue_on_error)
        .await
        .map_err(FlowError::from)?;
    info!(
        bundle_dir = %bundle_dir.display(),
        created = report.created,
        updated = report.updated,
        conflicts = report.conflicts.len(),
        "applied bundle"
    );
    render::print_bundle_apply_report(&report);
    Ok(())
}

async fn run_db_snapshot(db: &Db, dest: &std::path::Path) -> Result<(), FlowError> {
    db.snapshot_to(dest)
        .await
        .map_err(|e| FlowError::IoError { path: dest.display().to_string(), cause: e.to_string() })?;
    println!("Snapshot written to {}", dest.display());
    Ok(())
}

async fn run_merge(
    dest_db: &Db,
    source_db_path: &std::path::Path,
    source_project: &str,
    dest_project: &str,
    actor_uuid: Option<Uuid>,
    source_attachments_root: Option<PathBuf>,
    dest_attachments_root: Option<PathBuf>,
    dry_run: bool,
) -> Result<(), FlowError> {
    let source_db = Db::open(source_db_path)
        .await
        .map_err(|e| FlowError::IoError { path: source_db_path.display().to_string(), cause: e.to_string() })?;
    let report = merge::merge_project(
        &source_db,
        dest_db,
        source_project,
        dest_project,
        actor_uuid,
        source_attachments_root.as_deref(),
        dest_attachments_root.as_deref(),
        dry_run,
    )
    .await
    .map_err(FlowError::from)?;
    info!(
        source_project,
        dest_project,
        containers = report.containers_merged,
        tasks = report.tasks_merged,
        dry_run,
        "merged project"
    );
    render::print_merge_report(&report);
    Ok(())
}

async fn run_patch(
    db: &Db,
    actor_uuid: Option<Uuid>,
    project_root: Option<&str>,
    cmd: PatchCommand,
) -> Result<(), FlowError> {
    match cmd {
        PatchCommand::Create { project, base, out } => {
            let project = resolve_project_path(project_root, &project);
            let from = read_snapshot(&base)?;
            let to = patch::snapshot_project(db, &project).await.map_err(FlowError::from)?;
            let revision = patch::current_revision(db).await.map_err(FlowError::from)?;
            let built = patch::create(&from, &to, revision);
            write_patch(&out, &built)?;
            println!("Wrote patch with {} op(s) to {}", built.ops.len(), out.display());
        }
        PatchCommand::Validate { patch_file, project, strict } => {
            let project = resolve_project_path(project_root, &project);
            let loaded = read_patch(&patch_file)?;
            let base = patch::snapshot_project(db, &project).await.map_err(FlowError::from)?;
            let report = patch::validate(&loaded, &base, strict).map_err(FlowError::from)?;
            if report.violations.is_empty() {
                println!("No violations found.");
            } else {
                for violation in &report.violations {
                    println!("  {violation}");
                }
            }
        }
        PatchCommand::Apply { patch_file, if_match, dry_run, strict } => {
            let loaded = read_patch(&patch_file)?;
            let report = patch::apply(db, actor_uuid, &loaded, if_match, dry_run, strict)
                .await
                .map_err(FlowError::from)?;
            println!(
                "Applied patch: {} field(s) changed, {} created, {} removed",
                report.fields_changed, report.entities_created, report.entities_removed
            );
        }
        PatchCommand::Rebase { patch_file, old_project, new_project, out } => {
            let old_project = resolve_project_path(project_root, &old_project);
            let new_project = resolve_project_path(project_root, &new_project);
            let loaded = read_patch(&patch_file)?;
            let old_base = patch::snapshot_project(db, &old_project).await.map_err(FlowError::from)?;
            let new_base = patch::snapshot_project(db, &new_project).await.map_err(FlowError::from)?;
            let (rebased, report) = patch::rebase(&loaded, &old_base, &new_base).map_err(FlowError::from)?;
            write_patch(&out, &rebased)?;
            println!("Rebased {} reference(s), wrote to {}", report.code_rewrites.len(), out.display());
        }
        PatchCommand::Summarize { patch_file, project, format } => {
            let loaded = read_patch(&patch_file)?;
            let base = match project {
                Some(p) => {
                    let p = resolve_project_path(project_root, &p);
                    Some(patch::snapshot_project(db, &p).await.map_err(FlowError::from)?)
                }
                None => None,
            };
            print!("{}", patch::summarize(&loaded, base.as_ref(), format));
        }
    }
    Ok(())
}

/// Rewrite a path-style argument to be relative to `project_root`, unless it
/// already starts with that prefix.
fn resolve_project_path(project_root: Option<&str>, path: &str) -> String {
    let Some(root) = project_root.filter(|r| !r.is_empty()) else {
        return path.to_string();
    };
    if path == root || path.starts_with(&format!("{root}/")) {
        path.to_string()
    } else {
        flow_core::join_path(root, path)
    }
}

fn read_snapshot(path: &std::path::Path) -> Result<patch::Snapshot, FlowError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FlowError::IoError { path: path.display().to_string(), cause: e.to_string() })?;
    serde_json::from_str(&content).map_err(|e| FlowError::Internal(e.to_string()))
}

fn read_patch(path: &std::path::Path) -> Result<Patch, FlowError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FlowError::IoError { path: path.display().to_string(), cause: e.to_string() })?;
    serde_json::from_str(&content).map_err(|e| FlowError::Internal(e.to_string()))
}

fn write_patch(path: &std::path::Path, built: &Patch) -> Result<(), FlowError> {
    let json = serde_json::to_string_pretty(built).map_err(|e| FlowError::Internal(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| FlowError::IoError { path: path.display().to_string(), cause: e.to_string() })
}

async fn run_doctor(db: &Db, attachments_root: Option<PathBuf>, fix: bool) -> Result<(), FlowError> {
    let report = doctor::run(db, attachments_root.as_deref(), fix).await.map_err(FlowError::from)?;
    render::print_doctor_report(&report);
    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
