//! Reconciliation of local task state against the remote service.
//!
//! Two kinds of streams run here, both on [`crate::schedule`]:
//!
//! - the global loop, which rebuilds the whole snapshot every 2s while any
//!   task is queued or running and every 30s otherwise;
//! - one completion poll per freshly submitted task, which polls that task
//!   every 2s (after a 1s grace delay) until it reaches a terminal status,
//!   then notifies once, forces a global reconciliation and stops.
//!
//! Fetch failures are logged and retried on the next tick. An
//! `Unauthorized` answer from any fetch emits
//! [`CoordinatorEvent::SessionExpired`] and stops both the stream that
//! received it and the global loop.
//!
//! A completion poll whose task is unknown to the service gives up after
//! a few attempts, or at once if the task was seen before.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use imgrelay_client::{RemoteError, TaskClient};
use imgrelay_core::{Snapshot, Task, TaskId};

use crate::config::PollingConfig;
use crate::events::CoordinatorEvent;
use crate::schedule::{self, IntervalPolicy, Poller, Schedule, ScheduleHandle, TickOutcome};
use crate::store::TaskStateStore;

/// Completion polls answered `NotFound` before a task is first seen.
const MAX_UNSEEN_POLLS: u32 = 5;

/// Drives all polling streams and is the only writer of the store.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn TaskClient>,
    store: TaskStateStore,
    events: broadcast::Sender<CoordinatorEvent>,
    config: PollingConfig,
    shutdown: CancellationToken,
    /// Serializes every snapshot replacement.
    reconcile_lock: tokio::sync::Mutex<()>,
    global: Mutex<Option<ScheduleHandle>>,
    watches: Mutex<HashMap<TaskId, ScheduleHandle>>,
    notified: Mutex<HashSet<TaskId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PollingCoordinator {
    /// Create a coordinator. No stream runs until [`Self::start`] or
    /// [`Self::watch_task`] is called.
    pub fn new(client: Arc<dyn TaskClient>, config: PollingConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                client,
                store: TaskStateStore::new(),
                events,
                config,
                shutdown: CancellationToken::new(),
                reconcile_lock: tokio::sync::Mutex::new(()),
                global: Mutex::new(None),
                watches: Mutex::new(HashMap::new()),
                notified: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Start the global reconciliation loop.
    ///
    /// No-op while the loop is running; restarts it if it stopped after an
    /// `Unauthorized` answer. Must be called within a tokio runtime.
    pub fn start(&self) {
        if self.is_shut_down() {
            warn!("Polling coordinator is shut down, not starting global loop");
            return;
        }
        let mut global = lock(&self.inner.global);
        if global.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let config = &self.inner.config;
        let schedule = Schedule {
            name: "global".to_string(),
            initial_delay: Duration::ZERO,
            policy: IntervalPolicy::Adaptive {
                active: config.active_interval,
                idle: config.idle_interval,
            },
        };
        let poller = GlobalPoller {
            inner: Arc::downgrade(&self.inner),
        };

        info!(
            active_secs = config.active_interval.as_secs(),
            idle_secs = config.idle_interval.as_secs(),
            "Starting global reconciliation loop"
        );
        *global = Some(schedule::spawn(
            schedule,
            poller,
            self.inner.shutdown.child_token(),
        ));
    }

    /// Ask the global loop to reconcile now rather than at its next tick.
    pub fn wake(&self) {
        if let Some(handle) = lock(&self.inner.global).as_ref() {
            handle.wake();
        }
    }

    /// Fetch everything and replace the snapshot once.
    ///
    /// On `Unauthorized` the session is also reported expired and the global
    /// loop stopped.
    pub async fn reconcile(&self) -> Result<Arc<Snapshot>, RemoteError> {
        let result = self.inner.reconcile().await;
        if let Err(e) = &result {
            if e.is_unauthorized() {
                self.inner.expire_session(e);
            }
        }
        result
    }

    /// Fold a task known locally, such as one just created, into the
    /// snapshot. Ignored after shutdown.
    pub async fn track(&self, task: &Task) {
        self.inner.apply_task(task, &self.inner.shutdown).await;
    }

    /// Start a completion poll for `task_id`.
    ///
    /// Ignored if the task is already watched or the coordinator is shut
    /// down.
    pub fn watch_task(&self, task_id: TaskId) {
        if self.is_shut_down() {
            warn!(task_id = %task_id, "Polling coordinator is shut down, not watching task");
            return;
        }
        let mut watches = lock(&self.inner.watches);
        if watches.get(&task_id).is_some_and(|handle| !handle.is_finished()) {
            debug!(task_id = %task_id, "Task already watched");
            return;
        }

        let token = self.inner.shutdown.child_token();
        let schedule = Schedule {
            name: format!("task {}", task_id),
            initial_delay: self.inner.config.task_grace_delay,
            policy: IntervalPolicy::Fixed(self.inner.config.task_interval),
        };
        let poller = TaskPoller {
            inner: Arc::downgrade(&self.inner),
            task_id: task_id.clone(),
            token: token.clone(),
            seen: false,
            unseen_polls: 0,
        };

        debug!(task_id = %task_id, "Watching task until terminal");
        watches.insert(task_id, schedule::spawn(schedule, poller, token));
    }

    /// Stop the completion poll for `task_id`. Returns true if one was
    /// running.
    pub fn stop_watch(&self, task_id: &TaskId) -> bool {
        match lock(&self.inner.watches).remove(task_id) {
            Some(handle) => {
                handle.cancel();
                debug!(task_id = %task_id, "Stopped watching task");
                !handle.is_finished()
            }
            None => false,
        }
    }

    /// Returns true while a completion poll for `task_id` is running.
    pub fn is_watching(&self, task_id: &TaskId) -> bool {
        lock(&self.inner.watches)
            .get(task_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.read()
    }

    /// Read access to the store.
    pub fn store(&self) -> &TaskStateStore {
        &self.inner.store
    }

    /// Receiver notified whenever the snapshot is replaced.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.store.subscribe()
    }

    /// Receiver for task and session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Returns true once [`Self::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel every stream and wait for them to stop.
    ///
    /// Pending timers are released; no stream touches the store afterwards.
    pub async fn shutdown(&self) {
        info!("Shutting down polling coordinator");
        self.inner.shutdown.cancel();

        let global = lock(&self.inner.global).take();
        let watches: Vec<ScheduleHandle> = lock(&self.inner.watches)
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        if let Some(handle) = global {
            handle.join().await;
        }
        for handle in watches {
            handle.join().await;
        }
        info!("Polling coordinator shutdown complete");
    }
}

impl Inner {
    async fn reconcile(&self) -> Result<Arc<Snapshot>, RemoteError> {
        let _guard = self.reconcile_lock.lock().await;

        let listing = self.client.list_tasks().await?;
        let recent = self
            .client
            .list_recent_history(self.config.history_limit)
            .await?;
        let stats = self.client.get_stats().await?;

        for task in listing.current.iter().chain(&listing.queue).chain(&recent) {
            if let Err(e) = task.check_invariants() {
                warn!(error = %e, "Remote task record is inconsistent");
            }
        }

        let previous = self.store.read();
        let snapshot = self.store.replace(Snapshot::build(
            &previous,
            listing,
            recent,
            stats,
            self.config.history_limit,
        ));
        debug!(
            current = snapshot.current.is_some(),
            queued = snapshot.queue.len(),
            recent = snapshot.recent.len(),
            "Snapshot replaced"
        );
        Ok(snapshot)
    }

    /// Fold one freshly polled task into the snapshot.
    ///
    /// Returns the record the snapshot now holds for the task. A non-terminal
    /// observation of a task already recorded as finished is older than that
    /// record, so it is dropped and the finished record returned instead.
    /// Returns `None` if the stream was cancelled in the meantime.
    async fn apply_task(&self, task: &Task, token: &CancellationToken) -> Option<Task> {
        let _guard = self.reconcile_lock.lock().await;
        if token.is_cancelled() {
            return None;
        }
        let current = self.store.read();
        if !task.is_terminal() {
            if let Some(finished) = current.finished(&task.id) {
                debug!(
                    task_id = %task.id,
                    observed = %task.status,
                    recorded = %finished.status,
                    "Dropping stale task observation"
                );
                return Some(finished.clone());
            }
        }
        self.store
            .replace(current.with_task(task, self.config.history_limit));
        Some(task.clone())
    }

    fn notify_finished(&self, task: Task) {
        if !lock(&self.notified).insert(task.id.clone()) {
            return;
        }
        info!(
            task_id = %task.id,
            status = %task.status,
            duration_secs = task.duration_seconds.unwrap_or_default(),
            "Task reached terminal status"
        );
        let _ = self.events.send(CoordinatorEvent::TaskFinished(task));
    }

    fn expire_session(&self, err: &RemoteError) {
        warn!(error = %err, "Task service rejected the session, stopping polling");
        if let Some(handle) = lock(&self.global).as_ref() {
            handle.cancel();
        }
        let _ = self
            .events
            .send(CoordinatorEvent::SessionExpired(err.to_string()));
    }

    fn forget_watch(&self, task_id: &TaskId) {
        lock(&self.watches).remove(task_id);
    }
}

struct GlobalPoller {
    inner: Weak<Inner>,
}

#[async_trait]
impl Poller for GlobalPoller {
    async fn tick(&mut self) -> TickOutcome {
        let Some(inner) = self.inner.upgrade() else {
            return TickOutcome::Finished;
        };

        match inner.reconcile().await {
            Ok(snapshot) if snapshot.has_active() => TickOutcome::Active,
            Ok(_) => TickOutcome::Idle,
            Err(e) if e.is_unauthorized() => {
                inner.expire_session(&e);
                TickOutcome::Finished
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation failed, retrying on next tick");
                if inner.store.read().has_active() {
                    TickOutcome::Active
                } else {
                    TickOutcome::Idle
                }
            }
        }
    }
}

struct TaskPoller {
    inner: Weak<Inner>,
    task_id: TaskId,
    token: CancellationToken,
    /// The service has returned the task at least once.
    seen: bool,
    unseen_polls: u32,
}

#[async_trait]
impl Poller for TaskPoller {
    async fn tick(&mut self) -> TickOutcome {
        let Some(inner) = self.inner.upgrade() else {
            return TickOutcome::Finished;
        };

        let observed = match inner.client.get_task_status(&self.task_id).await {
            Ok(task) => task,
            Err(e) if e.is_unauthorized() => {
                inner.expire_session(&e);
                inner.forget_watch(&self.task_id);
                return TickOutcome::Finished;
            }
            Err(RemoteError::NotFound(_)) if self.seen => {
                info!(task_id = %self.task_id, "Task no longer exists, stopping watch");
                inner.forget_watch(&self.task_id);
                return TickOutcome::Finished;
            }
            Err(RemoteError::NotFound(_)) => {
                self.unseen_polls += 1;
                if self.unseen_polls >= MAX_UNSEEN_POLLS {
                    warn!(
                        task_id = %self.task_id,
                        attempts = self.unseen_polls,
                        "Task never became visible, stopping watch"
                    );
                    inner.forget_watch(&self.task_id);
                    return TickOutcome::Finished;
                }
                debug!(task_id = %self.task_id, "Task not visible yet");
                return TickOutcome::Active;
            }
            Err(e) => {
                warn!(
                    task_id = %self.task_id,
                    error = %e,
                    "Task poll failed, retrying on next tick"
                );
                return TickOutcome::Active;
            }
        };
        self.seen = true;

        let Some(task) = inner.apply_task(&observed, &self.token).await else {
            return TickOutcome::Finished;
        };

        if !task.is_terminal() {
            debug!(
                task_id = %self.task_id,
                status = %task.status,
                progress = task.progress_percent,
                step = task.current_step,
                "Task progress"
            );
            return TickOutcome::Active;
        }

        inner.notify_finished(task);
        match inner.reconcile().await {
            Ok(_) => {}
            Err(e) if e.is_unauthorized() => inner.expire_session(&e),
            Err(e) => {
                warn!(
                    task_id = %self.task_id,
                    error = %e,
                    "Reconciliation after completion failed"
                );
            }
        }
        inner.forget_watch(&self.task_id);
        TickOutcome::Finished
    }
}
