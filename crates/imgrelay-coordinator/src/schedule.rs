//! Cancellable periodic polling.
//!
//! One loop implementation serves every polling stream. A stream supplies a
//! [`Poller`] (what one tick does and whether the stream is done) and an
//! [`IntervalPolicy`] (how long to wait before the next tick). Ticks of one
//! stream never overlap: the next delay only starts once a tick returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Work is in progress somewhere; poll at the active cadence.
    Active,
    /// Nothing is in progress; poll at the idle cadence.
    Idle,
    /// The stream is done and stops.
    Finished,
}

/// Delay between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalPolicy {
    /// Same delay regardless of activity.
    Fixed(Duration),
    /// Short delay while active, long delay while idle.
    Adaptive { active: Duration, idle: Duration },
}

impl IntervalPolicy {
    /// Delay before the next tick, or `None` once finished.
    pub fn next_delay(&self, outcome: TickOutcome) -> Option<Duration> {
        match (self, outcome) {
            (_, TickOutcome::Finished) => None,
            (Self::Fixed(every), _) => Some(*every),
            (Self::Adaptive { active, .. }, TickOutcome::Active) => Some(*active),
            (Self::Adaptive { idle, .. }, TickOutcome::Idle) => Some(*idle),
        }
    }
}

/// One polling stream's tick.
#[async_trait]
pub trait Poller: Send + 'static {
    async fn tick(&mut self) -> TickOutcome;
}

/// Timing of a polling stream.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Name used in logs.
    pub name: String,
    /// Delay before the first tick.
    pub initial_delay: Duration,
    pub policy: IntervalPolicy,
}

/// Handle to a running stream.
///
/// Dropping the handle detaches the stream; call [`ScheduleHandle::cancel`]
/// to stop it.
pub struct ScheduleHandle {
    token: CancellationToken,
    wake: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stop the stream. A pending timer is released and an in-flight tick
    /// is dropped at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Run the next tick now instead of waiting out the current delay.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Returns true once the stream has stopped.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the stream to stop.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            debug!(error = %e, "Schedule task ended abnormally");
        }
    }
}

/// Spawn a polling stream on the current runtime.
///
/// The stream stops when `poller` reports [`TickOutcome::Finished`] or when
/// `token` is cancelled, whichever comes first.
pub fn spawn<P: Poller>(schedule: Schedule, poller: P, token: CancellationToken) -> ScheduleHandle {
    let wake = Arc::new(Notify::new());
    let join = tokio::spawn(run(schedule, poller, token.clone(), wake.clone()));
    ScheduleHandle { token, wake, join }
}

async fn run<P: Poller>(
    schedule: Schedule,
    mut poller: P,
    token: CancellationToken,
    wake: Arc<Notify>,
) {
    debug!(schedule = %schedule.name, "Schedule started");
    let mut delay = schedule.initial_delay;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = wake.notified() => {
                debug!(schedule = %schedule.name, "Woken before delay elapsed");
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = poller.tick() => outcome,
        };

        match schedule.policy.next_delay(outcome) {
            Some(next) => delay = next,
            None => break,
        }
    }

    debug!(schedule = %schedule.name, "Schedule stopped");
}
