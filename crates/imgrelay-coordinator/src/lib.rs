//! Task lifecycle coordination for imgrelay.
//!
//! [`TaskLifecycleCoordinator`] is the entry point: it turns a raw source
//! reference and a destination into a remote transfer task, then keeps a
//! [`TaskStateStore`] in sync with the remote service through the
//! [`PollingCoordinator`].
//!
//! Both polling streams (the global reconciliation loop and the per-task
//! completion poll) run on the cancellable [`schedule`] primitive.

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod polling;
pub mod schedule;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PollingConfig;
pub use error::CoordinatorError;
pub use events::CoordinatorEvent;
pub use lifecycle::{Destination, SubmitRequest, TaskLifecycleCoordinator};
pub use polling::PollingCoordinator;
pub use store::TaskStateStore;
