//! Authoritative local copy of task state.

use std::sync::Arc;

use tokio::sync::watch;

use imgrelay_core::Snapshot;

/// Holds the latest [`Snapshot`].
///
/// Snapshots are swapped whole, so readers never see a mix of old and new
/// state. Only the polling coordinator writes; everyone else reads or
/// subscribes to changes.
pub struct TaskStateStore {
    tx: watch::Sender<Arc<Snapshot>>,
}

impl TaskStateStore {
    /// Create a store holding an empty snapshot.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::default()));
        Self { tx }
    }

    /// Latest complete snapshot.
    pub fn read(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    /// Atomically swap in a new snapshot.
    pub(crate) fn replace(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}

impl Default for TaskStateStore {
    fn default() -> Self {
        Self::new()
    }
}
