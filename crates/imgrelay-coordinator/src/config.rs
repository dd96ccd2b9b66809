//! Polling configuration.

use std::time::Duration;

/// Timing and sizing knobs for the polling coordinator.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Global reconciliation period while any task is queued or running.
    pub active_interval: Duration,

    /// Global reconciliation period when nothing is active.
    pub idle_interval: Duration,

    /// Period of the per-task completion poll.
    pub task_interval: Duration,

    /// Delay before the first completion poll of a new task, giving the
    /// service time to persist it.
    pub task_grace_delay: Duration,

    /// Maximum number of finished tasks kept in `Snapshot::recent`.
    pub history_limit: usize,

    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(30),
            task_interval: Duration::from_secs(2),
            task_grace_delay: Duration::from_secs(1),
            history_limit: 10,
            event_capacity: 64,
        }
    }
}
