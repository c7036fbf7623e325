//! Output rendering for the flow CLI.
//!
//! Formats containers, tasks, and operation reports for terminal display.

use flow_core::{Container, Task, TaskState};
use flow_store::bundle::apply::ApplyReport;
use flow_store::bundle::Manifest;
use flow_store::doctor::{Report as DoctorReport, Severity};
use flow_store::merge::MergeReport;
use flow_store::mutation::AcknowledgeReport;

pub fn print_container_created(container: &Container) {
    println!("Created container: {}", container.friendly_id);
    println!("  Slug:   {}", container.slug);
    if let Some(ref title) = container.title {
        println!("  Title:  {}", title);
    }
    println!("  Kind:   {}", container.kind.as_str());
}

pub fn print_task_created(task: &Task) {
    println!("Created task: {}", task.friendly_id);
    println!("  Slug:     {}", task.slug);
    println!("  Title:    {}", task.title);
    println!("  State:    {}", task.state.as_str());
    println!("  Priority: {}", task.priority);
}

pub fn print_task_list(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<10}  {:<10}  {:<12}  {:<8}  {:<30}",
        "ID", "STATE", "KIND", "PRI", "TITLE"
    );
    println!("{}", "-".repeat(80));

    for task in tasks {
        println!(
            "{:<10}  {:<10}  {:<12}  {:<8}  {:<30}",
            task.friendly_id,
            task.state.as_str(),
            task.kind.as_str(),
            task.priority,
            truncate(&task.title, 30),
        );
    }

    println!();
    println!("{} task(s)", tasks.len());
}

pub fn print_container_list(containers: &[Container]) {
    if containers.is_empty() {
        println!("No containers found.");
        return;
    }

    println!("{:<10}  {:<12}  {:<30}", "ID", "KIND", "SLUG");
    println!("{}", "-".repeat(60));

    for container in containers {
        println!(
            "{:<10}  {:<12}  {:<30}",
            container.friendly_id,
            container.kind.as_str(),
            container.slug,
        );
    }

    println!();
    println!("{} container(s)", containers.len());
}

pub fn print_container_detail(container: &Container, path: &str, children: &[Container], tasks: &[Task]) {
    println!("Container: {}", container.friendly_id);
    println!();
    println!("  Path:    {}", path);
    println!("  Kind:    {}", container.kind.as_str());
    if let Some(ref title) = container.title {
        println!("  Title:   {}", title);
    }
    println!("  Etag:    {}", container.version);
    println!("  Created: {}", format_time(&container.created_at));

    if !children.is_empty() {
        println!();
        println!("  Containers:");
        for child in children {
            println!("    {}  {}", child.friendly_id, child.slug);
        }
    }

    if !tasks.is_empty() {
        println!();
        println!("  Tasks:");
        for task in tasks {
            println!("    {}  {}  ({})", task.friendly_id, task.title, task.state.as_str());
        }
    }
}

pub fn print_task_detail(task: &Task, path: &str, blockers: &[Task]) {
    println!("Task: {}", task.friendly_id);
    println!();
    println!("  Path:       {}", path);
    println!("  Title:      {}", task.title);
    println!("  State:      {}", task.state.as_str());
    println!("  Kind:       {}", task.kind.as_str());
    println!("  Priority:   {}", task.priority);
    if let Some(ref resolution) = task.resolution {
        println!("  Resolution: {}", resolution.as_str());
    }
    if let Some(due) = task.due_at {
        println!("  Due:        {}", format_time(&due));
    }
    if let Some(ref labels) = task.labels {
        println!("  Labels:     {}", labels.join(", "));
    }
    println!("  Etag:       {}", task.version);
    println!("  Created:    {}", format_time(&task.created_at));
    println!("  Updated:    {}", format_time(&task.updated_at));

    if let Some(ref description) = task.description {
        if !description.is_empty() {
            println!();
            println!("  Description:");
            for line in description.lines() {
                println!("    {}", line);
            }
        }
    }

    if !blockers.is_empty() {
        println!();
        println!("  Blocked by:");
        for blocker in blockers {
            println!("    {}  {}  ({})", blocker.friendly_id, blocker.title, blocker.state.as_str());
        }
    }
}

pub fn print_blocked(blockers: &[Task]) {
    if blockers.is_empty() {
        println!("Not blocked.");
        return;
    }
    println!("Blocked by {} task(s):", blockers.len());
    for blocker in blockers {
        println!("  {}  {}  ({})", blocker.friendly_id, blocker.title, blocker.state.as_str());
    }
}

pub fn print_ack_report(report: &AcknowledgeReport) {
    println!("Acknowledged {} of {} task(s)", report.acknowledged, report.total);
    if report.skipped > 0 {
        println!("  Skipped (already acknowledged): {}", report.skipped);
    }
}

pub fn print_bundle_manifest(manifest: &Manifest) {
    println!("Bundle written");
    println!("  Tasks:       {}", manifest.ref_count);
    println!("  Attachments: {}", manifest.with_attachments);
    println!("  Events:      {}", manifest.with_events);
}

pub fn print_bundle_apply_report(report: &ApplyReport) {
    println!("Bundle applied");
    println!("  Created: {}", report.created);
    println!("  Updated: {}", report.updated);
    if !report.conflicts.is_empty() {
        println!("  Conflicts:");
        for conflict in &report.conflicts {
            println!("    {} ({})", conflict.path, conflict.reason);
            for change in &conflict.field_changes {
                println!("      {}: {} -> {}", change.field, change.current, change.incoming);
            }
        }
    }
    if !report.errors.is_empty() {
        println!("  Errors:");
        for error in &report.errors {
            println!("    {}", error);
        }
    }
}

pub fn print_merge_report(report: &MergeReport) {
    if report.dry_run {
        println!("Merge (dry run)");
    } else {
        println!("Merge complete");
    }
    println!("  Containers merged:  {}", report.containers_merged);
    println!("  Sections merged:    {}", report.sections_merged);
    println!("  Tasks merged:       {}", report.tasks_merged);
    println!("  Actors merged:      {}", report.actors_merged);
    println!("  Comments merged:    {}", report.comments_merged);
    println!("  Relations merged:   {}", report.relations_merged);
    println!("  Attachments merged: {}", report.attachments_merged);
    if !report.attachment_conflicts.is_empty() {
        println!("  Attachment conflicts: {}", report.attachment_conflicts.join(", "));
    }
    if !report.counters_fixed.is_empty() {
        println!("  Counters fixed:");
        for fix in &report.counters_fixed {
            println!("    {fix}");
        }
    }
    if !report.renames.is_empty() {
        println!("  Renames:");
        for rename in &report.renames {
            println!("    {} {} -> {}", rename.kind, rename.from_slug, rename.to_slug);
        }
    }
    if !report.actor_mismatches.is_empty() {
        println!("  Actor mismatches:");
        for mismatch in &report.actor_mismatches {
            println!("    {}: source={} dest={}", mismatch.slug, mismatch.source_uuid, mismatch.dest_uuid);
        }
    }
    if !report.dropped_parents.is_empty() {
        println!("  Dropped parent links: {}", report.dropped_parents.join(", "));
    }
}

pub fn print_doctor_report(report: &DoctorReport) {
    if report.findings.is_empty() {
        println!("No issues found.");
    } else {
        println!("{:<8}  {:<22}  {}", "LEVEL", "CHECK", "MESSAGE");
        println!("{}", "-".repeat(80));
        for finding in &report.findings {
            println!(
                "{:<8}  {:<22}  {}",
                format_severity(&finding.severity),
                finding.check,
                finding.message,
            );
        }
    }
    if !report.fixed.is_empty() {
        println!();
        println!("Fixed:");
        for fix in &report.fixed {
            println!("  {}", fix);
        }
    }
}

fn format_severity(severity: &Severity) -> &'static str {
    match severity {
        Severity::Info => "INFO",
        Severity::Warning => "WARN",
        Severity::Error => "ERROR",
    }
}

pub fn format_state(state: TaskState) -> &'static str {
    state.as_str()
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}
