//! Point-in-time view of all task state.

use serde::{Deserialize, Serialize};

use crate::{Task, TaskId, TaskStatus};

/// Aggregate counters reported by the remote task service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    /// All tasks ever submitted.
    pub total: u64,
    /// Completed tasks.
    pub success_count: u64,
    /// Failed tasks.
    pub failed_count: u64,
    /// Tasks currently running.
    #[serde(default)]
    pub running: u64,
    /// Tasks waiting in the queue.
    #[serde(default)]
    pub queued: u64,
    /// Mean duration of finished tasks.
    #[serde(default)]
    pub average_duration_seconds: f64,
}

/// Active tasks as listed by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskListing {
    /// Task being executed, if any.
    #[serde(default)]
    pub current: Option<Task>,
    /// Queued tasks in submission order.
    #[serde(default)]
    pub queue: Vec<Task>,
}

/// Immutable snapshot of current, queued and recent tasks plus stats.
///
/// Snapshots are never edited in place; every change builds a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub current: Option<Task>,
    pub queue: Vec<Task>,
    /// Terminal tasks, most recent first.
    pub recent: Vec<Task>,
    pub stats: TaskStats,
}

impl Snapshot {
    /// Build the successor of `previous` from freshly fetched data.
    ///
    /// `recent` keeps terminal tasks only, most recent first, at most
    /// `history_limit` of them. Progress of a task that stays `running`
    /// never goes backwards relative to `previous`.
    pub fn build(
        previous: &Snapshot,
        listing: TaskListing,
        recent: Vec<Task>,
        stats: TaskStats,
        history_limit: usize,
    ) -> Self {
        let current = listing.current.map(|task| previous.carry_progress(task));

        let mut queue: Vec<Task> = listing
            .queue
            .into_iter()
            .map(|task| previous.carry_progress(task))
            .collect();
        queue.sort_by_key(|task| task.created_at);

        let mut recent: Vec<Task> = recent.into_iter().filter(Task::is_terminal).collect();
        recent.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        recent.truncate(history_limit);

        Self {
            current,
            queue,
            recent,
            stats,
        }
    }

    /// New snapshot with one task's record replaced by `task`.
    ///
    /// A running task becomes `current`, a queued one stays in (or joins)
    /// the queue, a terminal one moves to the front of `recent`.
    pub fn with_task(&self, task: &Task, history_limit: usize) -> Self {
        let task = self.carry_progress(task.clone());
        let mut next = self.clone();
        let was_current = next.current.as_ref().is_some_and(|t| t.id == task.id);
        if task.status.is_active() {
            next.recent.retain(|t| t.id != task.id);
        }

        match task.status {
            TaskStatus::Running => {
                next.queue.retain(|t| t.id != task.id);
                next.current = Some(task);
            }
            TaskStatus::Queued => {
                if let Some(slot) = next.queue.iter_mut().find(|t| t.id == task.id) {
                    *slot = task;
                } else if was_current {
                    next.current = Some(task);
                } else {
                    next.queue.push(task);
                }
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                next.queue.retain(|t| t.id != task.id);
                if was_current {
                    next.current = None;
                }
                next.recent.retain(|t| t.id != task.id);
                next.recent.insert(0, task);
                next.recent.truncate(history_limit);
            }
        }
        next
    }

    /// Returns true if any task is queued or running.
    pub fn has_active(&self) -> bool {
        self.current.iter().chain(&self.queue).any(|t| t.status.is_active())
    }

    /// Terminal record of `id`, if it has already finished.
    pub fn finished(&self, id: &TaskId) -> Option<&Task> {
        self.recent.iter().find(|t| &t.id == id)
    }

    /// Look a task up by id across current, queue and recent.
    pub fn find(&self, id: &TaskId) -> Option<&Task> {
        self.current
            .iter()
            .chain(&self.queue)
            .chain(&self.recent)
            .find(|t| &t.id == id)
    }

    fn carry_progress(&self, mut task: Task) -> Task {
        if task.status != TaskStatus::Running {
            return task;
        }
        let previous = self
            .current
            .iter()
            .chain(&self.queue)
            .find(|t| t.id == task.id && t.status == TaskStatus::Running);
        if let Some(previous) = previous {
            if previous.progress_percent > task.progress_percent {
                task.progress_percent = previous.progress_percent;
            }
        }
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str, status: TaskStatus, offset: i64) -> Task {
        let mut task = Task::queued(
            TaskId::new(id),
            "nginx",
            "harbor/library/nginx:latest",
            t0() + Duration::seconds(offset),
        );
        task.status = status;
        if status.is_terminal() {
            task.ended_at = Some(t0() + Duration::seconds(offset + 10));
            task.duration_seconds = Some(10);
        }
        task
    }

    #[test]
    fn test_build_keeps_terminal_recent_most_recent_first() {
        let recent = vec![
            task("a", TaskStatus::Completed, 0),
            task("b", TaskStatus::Failed, 20),
            task("c", TaskStatus::Running, 30),
            task("d", TaskStatus::Cancelled, 10),
        ];
        let snapshot = Snapshot::build(
            &Snapshot::default(),
            TaskListing::default(),
            recent,
            TaskStats::default(),
            2,
        );
        let ids: Vec<&str> = snapshot.recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_build_orders_queue_by_submission() {
        let listing = TaskListing {
            current: None,
            queue: vec![
                task("late", TaskStatus::Queued, 5),
                task("early", TaskStatus::Queued, 1),
            ],
        };
        let snapshot =
            Snapshot::build(&Snapshot::default(), listing, vec![], TaskStats::default(), 10);
        assert_eq!(snapshot.queue[0].id.as_str(), "early");
        assert!(snapshot.has_active());
    }

    #[test]
    fn test_running_progress_never_decreases() {
        let mut running = task("r", TaskStatus::Running, 0);
        running.progress_percent = 60;
        let previous = Snapshot {
            current: Some(running.clone()),
            ..Snapshot::default()
        };

        running.progress_percent = 15;
        let listing = TaskListing {
            current: Some(running),
            queue: vec![],
        };
        let next = Snapshot::build(&previous, listing, vec![], TaskStats::default(), 10);
        assert_eq!(next.current.unwrap().progress_percent, 60);
    }

    #[test]
    fn test_with_task_moves_between_sections() {
        let base = Snapshot {
            queue: vec![task("q", TaskStatus::Queued, 0)],
            ..Snapshot::default()
        };

        let running = base.with_task(&task("q", TaskStatus::Running, 0), 10);
        assert!(running.queue.is_empty());
        assert_eq!(running.current.as_ref().unwrap().id.as_str(), "q");

        let done = running.with_task(&task("q", TaskStatus::Completed, 0), 10);
        assert!(done.current.is_none());
        assert_eq!(done.recent[0].id.as_str(), "q");
        assert!(!done.has_active());
        assert!(done.find(&TaskId::new("q")).is_some());

        // The previous snapshot is untouched.
        assert_eq!(base.queue.len(), 1);
    }

    #[test]
    fn test_active_record_leaves_recent() {
        let done = task("x", TaskStatus::Completed, 0);
        let previous = Snapshot {
            recent: vec![done],
            ..Snapshot::default()
        };
        assert!(previous.finished(&TaskId::new("x")).is_some());

        let next = previous.with_task(&task("x", TaskStatus::Running, 0), 10);
        assert!(next.recent.is_empty());
        assert!(next.finished(&TaskId::new("x")).is_none());
        assert_eq!(next.current.unwrap().id.as_str(), "x");
    }

    #[test]
    fn test_idle_snapshot_has_no_active_tasks() {
        let snapshot = Snapshot {
            recent: vec![task("done", TaskStatus::Completed, 0)],
            ..Snapshot::default()
        };
        assert!(!snapshot.has_active());
    }
}
