//! Terminal rendering of references, tasks and snapshots.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use imgrelay_core::{ImageReference, Snapshot, Task, TaskStatus, TransferStep};

pub fn reference_json(reference: &ImageReference) -> Value {
    json!({
        "registry": reference.registry(),
        "namespace": reference.namespace(),
        "repository": reference.repository(),
        "tag": reference.tag(),
        "full": reference.to_string(),
        "short": reference.short_name(),
        "origin": reference.origin(),
        "description": reference.describe(),
    })
}

pub fn print_task(task: &Task) {
    println!("  ID:         {}", task.id);
    println!("  Status:     {}", task.status);
    println!("  Source:     {}", task.source_reference);
    println!("  Target:     {}", task.target_reference);
    println!("  Created:    {}", format_timestamp(&task.created_at));

    if let Some(ended) = &task.ended_at {
        println!("  Ended:      {}", format_timestamp(ended));
    }
    if let Some(duration) = task.duration_seconds {
        println!("  Duration:   {}", format_duration(duration));
    }
    if let Some(error) = &task.error_message {
        println!("  Error:      {}", error);
    }
}

pub fn print_progress(task: &Task) {
    let mut line = format!(
        "  [{}/{}] {:<28} {:>3}%",
        task.current_step,
        TransferStep::ALL.len(),
        task.step_label,
        task.progress_percent
    );
    if let Some(remaining) = task.estimated_remaining(Utc::now()) {
        line.push_str(&format!("  ~{} left", format_duration(remaining)));
    }
    println!("{}", line);
}

pub fn print_snapshot(snapshot: &Snapshot) {
    match &snapshot.current {
        Some(task) => {
            println!("Current: {} ({})", task.source_reference, task.id);
            println!("  -> {}", task.target_reference);
            print_progress(task);
        }
        None => println!("Current: none"),
    }

    println!();
    println!("Queue ({}):", snapshot.queue.len());
    for (position, task) in snapshot.queue.iter().enumerate() {
        println!("  {:>2}. {:<36}  {}", position + 1, task.id, task.source_reference);
    }

    println!();
    println!("Recent ({}):", snapshot.recent.len());
    println!("{:<36}  {:<10}  {:<8}  {}", "ID", "STATUS", "DURATION", "SOURCE");
    println!("{}", "-".repeat(80));
    for task in &snapshot.recent {
        let duration = task
            .duration_seconds
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<10}  {:<8}  {}",
            task.id,
            status_name(task.status),
            duration,
            task.source_reference
        );
    }

    let stats = &snapshot.stats;
    println!();
    println!(
        "Total: {}  Succeeded: {}  Failed: {}  Running: {}  Queued: {}  Avg: {}",
        stats.total,
        stats.success_count,
        stats.failed_count,
        stats.running,
        stats.queued,
        format_duration(stats.average_duration_seconds.round() as u64)
    );
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "QUEUED",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
        TaskStatus::Cancelled => "CANCELLED",
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_duration(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m{}s", s / 60, s % 60),
        s => format!("{}h{}m", s / 3600, (s % 3600) / 60),
    }
}
