//! Client side of the remote task service.
//!
//! [`TaskClient`] is the request/response contract the coordinator depends
//! on; [`HttpTaskClient`] implements it over the service's REST API.

pub mod error;
pub mod http;
pub mod types;

pub use error::RemoteError;
pub use http::{HttpClientConfig, HttpTaskClient};
pub use types::{CreateTaskRequest, CreatedTask, DestinationCredentials};

use async_trait::async_trait;

use imgrelay_core::{Task, TaskId, TaskListing, TaskStats};

/// Contract of the remote task service.
///
/// The service owns task execution and history; implementations only carry
/// requests and map failures onto [`RemoteError`].
#[async_trait]
pub trait TaskClient: Send + Sync {
    /// Submit a transfer task.
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, RemoteError>;

    /// Fetch one task. Fails with [`RemoteError::NotFound`] for unknown ids.
    async fn get_task_status(&self, task_id: &TaskId) -> Result<Task, RemoteError>;

    /// Fetch the running task and the queue (submission order).
    async fn list_tasks(&self) -> Result<TaskListing, RemoteError>;

    /// Fetch terminal tasks, most recent first.
    async fn list_recent_history(&self, limit: usize) -> Result<Vec<Task>, RemoteError>;

    /// Fetch aggregate counters.
    async fn get_stats(&self) -> Result<TaskStats, RemoteError>;

    /// Cancel a task. Fails with [`RemoteError::InvalidState`] once terminal.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), RemoteError>;
}
