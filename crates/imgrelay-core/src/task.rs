//! Transfer task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, TaskId, TaskStatus, TransferStep};

/// A transfer task as known to the remote task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier assigned by the remote service.
    pub id: TaskId,

    /// Current status.
    pub status: TaskStatus,

    /// Source image reference as submitted.
    pub source_reference: String,

    /// Destination-qualified target reference.
    pub target_reference: String,

    /// Progress in percent (0-100).
    #[serde(default)]
    pub progress_percent: u8,

    /// 1-based index of the current transfer step (1-7).
    #[serde(default = "first_step")]
    pub current_step: u8,

    /// Label of the current step.
    #[serde(default)]
    pub step_label: String,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When execution started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,

    /// Run time in seconds, set once terminal.
    #[serde(default)]
    pub duration_seconds: Option<u64>,

    /// Failure message, set only for failed tasks.
    #[serde(default)]
    pub error_message: Option<String>,
}

fn first_step() -> u8 {
    TransferStep::Validate.index()
}

impl Task {
    /// Local record for a task the service has just accepted.
    pub fn queued(
        id: TaskId,
        source_reference: impl Into<String>,
        target_reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: TaskStatus::Queued,
            source_reference: source_reference.into(),
            target_reference: target_reference.into(),
            progress_percent: 0,
            current_step: TransferStep::Validate.index(),
            step_label: TransferStep::Validate.label().to_string(),
            created_at,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            error_message: None,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Current transfer step, if the index is in range.
    pub fn step(&self) -> Option<TransferStep> {
        TransferStep::from_index(self.current_step).ok()
    }

    /// Verify the status/timestamp invariants.
    ///
    /// `ended_at` and `duration_seconds` must be present exactly when the
    /// status is terminal, and `error_message` exactly when it is `failed`.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let terminal = self.is_terminal();
        if terminal != self.ended_at.is_some() {
            return Err(self.violation("ended_at must be set iff status is terminal"));
        }
        if terminal != self.duration_seconds.is_some() {
            return Err(self.violation("duration_seconds must be set iff status is terminal"));
        }
        if (self.status == TaskStatus::Failed) != self.error_message.is_some() {
            return Err(self.violation("error_message must be set iff status is failed"));
        }
        if self.progress_percent > 100 {
            return Err(self.violation("progress_percent exceeds 100"));
        }
        if self.step().is_none() {
            return Err(self.violation("current_step outside 1..=7"));
        }
        Ok(())
    }

    /// Estimate seconds until a running task finishes.
    ///
    /// Extrapolates linearly from elapsed time and progress; `None` when the
    /// task is not running, has no progress yet, or the estimate is not
    /// positive.
    pub fn estimated_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.status != TaskStatus::Running || self.progress_percent == 0 {
            return None;
        }
        let elapsed = (now - self.started_at?).num_seconds();
        if elapsed <= 0 {
            return None;
        }
        let total = elapsed * 100 / i64::from(self.progress_percent);
        u64::try_from(total - elapsed).ok().filter(|r| *r > 0)
    }

    fn violation(&self, reason: &str) -> CoreError {
        CoreError::InvariantViolation {
            task_id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn finished(status: TaskStatus) -> Task {
        let mut task =
            Task::queued(TaskId::new("t1"), "nginx", "harbor/library/nginx:latest", t0());
        task.status = status;
        task.started_at = Some(t0());
        task.ended_at = Some(t0() + Duration::seconds(42));
        task.duration_seconds = Some(42);
        task
    }

    #[test]
    fn test_queued_task_is_consistent() {
        let task = Task::queued(TaskId::new("t1"), "nginx", "harbor/library/nginx:latest", t0());
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.step(), Some(TransferStep::Validate));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_terminal_requires_end_and_duration() {
        assert!(finished(TaskStatus::Completed).check_invariants().is_ok());

        let mut missing_end = finished(TaskStatus::Completed);
        missing_end.ended_at = None;
        assert!(missing_end.check_invariants().is_err());

        let mut running_with_duration = finished(TaskStatus::Running);
        running_with_duration.ended_at = None;
        assert!(running_with_duration.check_invariants().is_err());
    }

    #[test]
    fn test_error_message_only_for_failed() {
        let mut failed = finished(TaskStatus::Failed);
        assert!(failed.check_invariants().is_err());
        failed.error_message = Some("push denied".to_string());
        assert!(failed.check_invariants().is_ok());

        let mut completed = finished(TaskStatus::Completed);
        completed.error_message = Some("stray".to_string());
        assert!(completed.check_invariants().is_err());
    }

    #[test]
    fn test_estimated_remaining() {
        let mut task = Task::queued(TaskId::new("t1"), "nginx", "h/library/nginx:latest", t0());
        assert_eq!(task.estimated_remaining(t0()), None);

        task.status = TaskStatus::Running;
        task.started_at = Some(t0());
        task.progress_percent = 25;
        assert_eq!(task.estimated_remaining(t0() + Duration::seconds(30)), Some(90));

        task.progress_percent = 100;
        assert_eq!(task.estimated_remaining(t0() + Duration::seconds(30)), None);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "id": "abc",
            "status": "pending",
            "source_reference": "nginx",
            "target_reference": "harbor/library/nginx:latest",
            "created_at": "2024-05-01T12:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.current_step, 1);
        assert_eq!(task.progress_percent, 0);
        assert!(task.check_invariants().is_ok());
    }
}
