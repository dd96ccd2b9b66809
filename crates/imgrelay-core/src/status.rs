//! Task status and transfer step enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of a transfer task as reported by the remote task service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting for the service to pick it up.
    #[default]
    #[serde(alias = "pending")]
    Queued,
    /// Pull/tag/push in progress.
    Running,
    /// Transfer finished successfully.
    #[serde(alias = "success")]
    Completed,
    /// Transfer failed.
    Failed,
    /// Cancelled by the operator.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the task is queued or running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" | "pending" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" | "success" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// The seven steps of an image transfer, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferStep {
    Validate = 1,
    Normalize = 2,
    Prepare = 3,
    Pull = 4,
    Tag = 5,
    Push = 6,
    Cleanup = 7,
}

impl TransferStep {
    /// All steps in order.
    pub const ALL: [TransferStep; 7] = [
        Self::Validate,
        Self::Normalize,
        Self::Prepare,
        Self::Pull,
        Self::Tag,
        Self::Push,
        Self::Cleanup,
    ];

    /// Look up a step by its 1-based index.
    pub fn from_index(index: u8) -> Result<Self, CoreError> {
        match index {
            1..=7 => Ok(Self::ALL[usize::from(index - 1)]),
            other => Err(CoreError::InvalidStep(other)),
        }
    }

    /// 1-based index.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validate => "Validating image",
            Self::Normalize => "Normalizing reference",
            Self::Prepare => "Preparing transfer",
            Self::Pull => "Pulling source image",
            Self::Tag => "Tagging image",
            Self::Push => "Pushing image",
            Self::Cleanup => "Cleaning up",
        }
    }

    /// Progress percentage reached once this step completes.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Validate => 5,
            Self::Normalize => 10,
            Self::Prepare => 15,
            Self::Pull => 60,
            Self::Tag => 70,
            Self::Push => 95,
            Self::Cleanup => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_legacy_status_spellings() {
        let pending: TaskStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(pending, TaskStatus::Queued);
        let success: TaskStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(success, TaskStatus::Completed);
        assert_eq!(serde_json::to_string(&TaskStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!("success".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_step_lookup() {
        assert_eq!(TransferStep::from_index(1).unwrap(), TransferStep::Validate);
        assert_eq!(TransferStep::from_index(7).unwrap(), TransferStep::Cleanup);
        assert!(TransferStep::from_index(0).is_err());
        assert!(TransferStep::from_index(8).is_err());
        for (i, step) in TransferStep::ALL.iter().enumerate() {
            assert_eq!(usize::from(step.index()), i + 1);
        }
    }

    #[test]
    fn test_step_progress_is_increasing() {
        let progress: Vec<u8> = TransferStep::ALL.iter().map(|s| s.progress()).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&100));
    }
}
