//! Scripted in-memory task service for coordinator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use imgrelay_client::{CreateTaskRequest, CreatedTask, RemoteError, TaskClient};
use imgrelay_core::{Task, TaskId, TaskListing, TaskStats, TaskStatus, TransferStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create,
    GetStatus(TaskId),
    List,
    History,
    Stats,
    Cancel(TaskId),
}

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    scripts: HashMap<TaskId, VecDeque<TaskStatus>>,
    next_script: Option<Vec<TaskStatus>>,
    calls: Vec<(Instant, Call)>,
    created: Vec<CreateTaskRequest>,
    failing_lists: usize,
    reject_create: Option<RemoteError>,
    unauthorized: bool,
    lists_unauthorized: bool,
    list_latency: Duration,
    status_latency: Duration,
    lists_in_flight: usize,
    max_lists_in_flight: usize,
    counter: usize,
}

/// Fake remote service.
///
/// `get_task_status` advances a task through its script, one status per
/// call, the way a real service would progress between polls.
pub(crate) struct FakeTaskClient {
    start: Instant,
    state: Mutex<State>,
}

impl FakeTaskClient {
    pub(crate) fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new(State::default()),
        }
    }

    /// Wall-clock time derived from the (possibly paused) tokio clock.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }

    /// Insert a task directly, as if submitted elsewhere.
    pub(crate) fn seed(&self, status: TaskStatus) -> TaskId {
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = TaskId::new(format!("task-{}", state.counter));
        let mut task = Task::queued(
            id.clone(),
            "docker.io/library/nginx:latest",
            "h/library/nginx:latest",
            now,
        );
        transition(&mut task, status, now);
        state.tasks.push(task);
        id
    }

    /// Statuses returned by successive status polls of the next created task.
    pub(crate) fn script_next(&self, statuses: Vec<TaskStatus>) {
        self.state.lock().unwrap().next_script = Some(statuses);
    }

    /// Statuses returned by successive status polls of `id`.
    pub(crate) fn script(&self, id: &TaskId, statuses: Vec<TaskStatus>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(id.clone(), statuses.into());
    }

    /// Change a task's status out of band.
    pub(crate) fn force_status(&self, id: &TaskId, status: TaskStatus) {
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
            transition(task, status, now);
        }
    }

    /// Remove a task, as if deleted on the service.
    pub(crate) fn remove(&self, id: &TaskId) {
        self.state.lock().unwrap().tasks.retain(|t| &t.id != id);
    }

    pub(crate) fn fail_next_lists(&self, count: usize) {
        self.state.lock().unwrap().failing_lists = count;
    }

    pub(crate) fn reject_create(&self, err: RemoteError) {
        self.state.lock().unwrap().reject_create = Some(err);
    }

    pub(crate) fn set_unauthorized(&self, unauthorized: bool) {
        self.state.lock().unwrap().unauthorized = unauthorized;
    }

    /// Reject only list fetches with `Unauthorized`.
    pub(crate) fn set_lists_unauthorized(&self, unauthorized: bool) {
        self.state.lock().unwrap().lists_unauthorized = unauthorized;
    }

    /// Delay between reading a task and answering, so the answer can be
    /// stale by the time it arrives.
    pub(crate) fn set_status_latency(&self, latency: Duration) {
        self.state.lock().unwrap().status_latency = latency;
    }

    pub(crate) fn set_list_latency(&self, latency: Duration) {
        self.state.lock().unwrap().list_latency = latency;
    }

    pub(crate) fn max_lists_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_lists_in_flight
    }

    pub(crate) fn created(&self) -> Vec<CreateTaskRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn count(&self, call: &Call) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(_, c)| c == call)
            .count()
    }

    /// Seconds since start at which `call` was made.
    pub(crate) fn call_times(&self, call: &Call) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(_, c)| c == call)
            .map(|(at, _)| at.duration_since(self.start).as_secs())
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((Instant::now(), call));
        if state.unauthorized {
            return Err(RemoteError::Unauthorized("token expired".to_string()));
        }
        Ok(())
    }
}

fn transition(task: &mut Task, status: TaskStatus, now: DateTime<Utc>) {
    task.status = status;
    let step = match status {
        TaskStatus::Queued => TransferStep::Validate,
        TaskStatus::Running => TransferStep::Pull,
        _ => TransferStep::Cleanup,
    };
    task.current_step = step.index();
    task.step_label = step.label().to_string();
    match status {
        TaskStatus::Queued => {}
        TaskStatus::Running => {
            task.started_at.get_or_insert(now);
            task.progress_percent = step.progress();
        }
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
            let started = task.started_at.unwrap_or(task.created_at);
            task.ended_at = Some(now);
            task.duration_seconds = Some((now - started).num_seconds() as u64);
            if status == TaskStatus::Completed {
                task.progress_percent = 100;
            }
            if status == TaskStatus::Failed {
                task.error_message = Some("push denied".to_string());
            }
        }
    }
}

#[async_trait]
impl TaskClient for FakeTaskClient {
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, RemoteError> {
        self.record(Call::Create)?;
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.reject_create.take() {
            return Err(err);
        }
        state.counter += 1;
        let id = TaskId::new(format!("task-{}", state.counter));
        state.tasks.push(Task::queued(
            id.clone(),
            request.source_reference.clone(),
            request.target_reference.clone(),
            now,
        ));
        if let Some(script) = state.next_script.take() {
            state.scripts.insert(id.clone(), script.into());
        }
        state.created.push(request.clone());
        Ok(CreatedTask {
            task_id: id,
            target_reference: request.target_reference.clone(),
        })
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<Task, RemoteError> {
        self.record(Call::GetStatus(task_id.clone()))?;
        let now = self.now();
        let (task, latency) = {
            let mut state = self.state.lock().unwrap();
            let next = state.scripts.get_mut(task_id).and_then(VecDeque::pop_front);
            let task = state
                .tasks
                .iter_mut()
                .find(|t| &t.id == task_id)
                .ok_or_else(|| RemoteError::NotFound(task_id.to_string()))?;
            if let Some(status) = next {
                transition(task, status, now);
            }
            (task.clone(), state.status_latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(task)
    }

    async fn list_tasks(&self) -> Result<TaskListing, RemoteError> {
        self.record(Call::List)?;
        let latency = {
            let mut state = self.state.lock().unwrap();
            if state.lists_unauthorized {
                return Err(RemoteError::Unauthorized("token expired".to_string()));
            }
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                return Err(RemoteError::Unreachable("connection refused".to_string()));
            }
            state.lists_in_flight += 1;
            state.max_lists_in_flight = state.max_lists_in_flight.max(state.lists_in_flight);
            state.list_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        state.lists_in_flight -= 1;
        Ok(TaskListing {
            current: state
                .tasks
                .iter()
                .find(|t| t.status == TaskStatus::Running)
                .cloned(),
            queue: state
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Queued)
                .cloned()
                .collect(),
        })
    }

    async fn list_recent_history(&self, limit: usize) -> Result<Vec<Task>, RemoteError> {
        self.record(Call::History)?;
        let state = self.state.lock().unwrap();
        let mut done: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| t.is_terminal())
            .cloned()
            .collect();
        done.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        done.truncate(limit);
        Ok(done)
    }

    async fn get_stats(&self) -> Result<TaskStats, RemoteError> {
        self.record(Call::Stats)?;
        let state = self.state.lock().unwrap();
        let count = |status: TaskStatus| {
            state.tasks.iter().filter(|t| t.status == status).count() as u64
        };
        let durations: Vec<u64> = state
            .tasks
            .iter()
            .filter_map(|t| t.duration_seconds)
            .collect();
        let average = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };
        Ok(TaskStats {
            total: state.tasks.len() as u64,
            success_count: count(TaskStatus::Completed),
            failed_count: count(TaskStatus::Failed),
            running: count(TaskStatus::Running),
            queued: count(TaskStatus::Queued),
            average_duration_seconds: average,
        })
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        self.record(Call::Cancel(task_id.clone()))?;
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| RemoteError::NotFound(task_id.to_string()))?;
        if task.is_terminal() {
            return Err(RemoteError::InvalidState(format!(
                "task {} already {}",
                task_id, task.status
            )));
        }
        transition(task, TaskStatus::Cancelled, now);
        Ok(())
    }
}
