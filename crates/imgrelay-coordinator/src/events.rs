//! Notifications emitted by the coordinator.

use imgrelay_core::{Task, TaskStatus};

/// Events broadcast to subscribers.
///
/// `TaskFinished` is delivered at most once per task id.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A watched task reached a terminal status.
    TaskFinished(Task),

    /// The remote service rejected the session; the caller must
    /// re-authenticate. The stream that saw it has stopped.
    SessionExpired(String),
}

impl CoordinatorEvent {
    /// Human-readable notification text.
    pub fn message(&self) -> String {
        match self {
            Self::TaskFinished(task) => match task.status {
                TaskStatus::Completed => format!(
                    "Transfer completed: {} -> {} ({}s)",
                    task.source_reference,
                    task.target_reference,
                    task.duration_seconds.unwrap_or_default()
                ),
                TaskStatus::Failed => format!(
                    "Transfer failed: {}: {}",
                    task.source_reference,
                    task.error_message.as_deref().unwrap_or("unknown error")
                ),
                TaskStatus::Cancelled => {
                    format!("Transfer cancelled: {}", task.source_reference)
                }
                status => format!("Transfer {}: {}", status, task.source_reference),
            },
            Self::SessionExpired(reason) => format!("Session expired: {}", reason),
        }
    }
}
