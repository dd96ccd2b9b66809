//! Submission and cancellation of transfer tasks.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use imgrelay_client::{CreateTaskRequest, DestinationCredentials, TaskClient};
use imgrelay_core::{rewrite, ImageReference, Snapshot, Task, TaskId};

use crate::config::PollingConfig;
use crate::error::CoordinatorError;
use crate::events::CoordinatorEvent;
use crate::polling::PollingCoordinator;

/// Destination registry chosen by the operator.
#[derive(Clone, PartialEq, Eq)]
pub enum Destination {
    /// Registry configuration saved on the service.
    Saved {
        config_id: String,
        /// Registry address, optionally with a path prefix.
        registry_url: String,
    },

    /// Registry typed in by the operator.
    Manual {
        host: String,
        username: String,
        password: String,
    },
}

impl Destination {
    /// Registry the target reference is rewritten against, and the
    /// credentials the service will push with.
    fn resolve(&self) -> Result<(&str, DestinationCredentials), CoordinatorError> {
        match self {
            Self::Saved {
                config_id,
                registry_url,
            } => {
                if config_id.trim().is_empty() {
                    return Err(CoordinatorError::Configuration(
                        "saved registry configuration has no id".to_string(),
                    ));
                }
                if registry_url.trim().is_empty() {
                    return Err(CoordinatorError::Configuration(format!(
                        "saved registry configuration {} has no registry address",
                        config_id
                    )));
                }
                Ok((
                    registry_url.as_str(),
                    DestinationCredentials::SavedConfig {
                        config_id: config_id.clone(),
                    },
                ))
            }
            Self::Manual {
                host,
                username,
                password,
            } => {
                let missing = [("host", host), ("username", username), ("password", password)]
                    .into_iter()
                    .find(|(_, value)| value.trim().is_empty());
                if let Some((field, _)) = missing {
                    return Err(CoordinatorError::Configuration(format!(
                        "destination {} is required",
                        field
                    )));
                }
                Ok((
                    host.as_str(),
                    DestinationCredentials::Manual {
                        host: host.trim().to_string(),
                        username: username.clone(),
                        password: password.clone(),
                    },
                ))
            }
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved {
                config_id,
                registry_url,
            } => f
                .debug_struct("Saved")
                .field("config_id", config_id)
                .field("registry_url", registry_url)
                .finish(),
            Self::Manual { host, username, .. } => f
                .debug_struct("Manual")
                .field("host", host)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// A transfer to submit.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Source reference as typed by the operator.
    pub source: String,

    pub destination: Option<Destination>,

    /// Target reference to use instead of the rewritten one.
    pub target_override: Option<String>,
}

impl SubmitRequest {
    pub fn new(source: impl Into<String>, destination: Destination) -> Self {
        Self {
            source: source.into(),
            destination: Some(destination),
            target_override: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_override = Some(target.into());
        self
    }
}

/// Entry point for submitting, cancelling and observing transfer tasks.
#[derive(Clone)]
pub struct TaskLifecycleCoordinator {
    client: Arc<dyn TaskClient>,
    polling: PollingCoordinator,
}

impl TaskLifecycleCoordinator {
    /// Create a coordinator and start its global reconciliation loop.
    ///
    /// Must be called within a tokio runtime. Call [`Self::shutdown`] to
    /// stop every timer it owns.
    pub fn start(client: Arc<dyn TaskClient>, config: PollingConfig) -> Self {
        let polling = PollingCoordinator::new(client.clone(), config);
        polling.start();
        Self { client, polling }
    }

    /// Create the remote task and start watching it.
    ///
    /// Returns the task as accepted by the service, in `queued` status.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task, CoordinatorError> {
        if self.polling.is_shut_down() {
            return Err(CoordinatorError::ShutDown);
        }

        let source = ImageReference::validate(&request.source)?;
        let destination = request.destination.as_ref().ok_or_else(|| {
            CoordinatorError::Configuration("no destination registry selected".to_string())
        })?;
        let (registry, credentials) = destination.resolve()?;

        let target = match &request.target_override {
            Some(raw) => ImageReference::validate(raw)?,
            None => {
                let result = rewrite(&source, registry).ok_or_else(|| {
                    CoordinatorError::Configuration(format!(
                        "destination registry '{}' has no host",
                        registry
                    ))
                })?;
                info!(
                    source = %source,
                    target = %result.target_reference,
                    rule = ?result.rule,
                    "{}",
                    result.rule.detail(&source)
                );
                result.target_reference
            }
        };

        let created = self
            .client
            .create_task(&CreateTaskRequest {
                source_reference: source.to_string(),
                target_reference: target.to_string(),
                destination: credentials,
            })
            .await?;

        info!(
            task_id = %created.task_id,
            source = %source,
            target = %created.target_reference,
            "Transfer task submitted"
        );

        let task = Task::queued(
            created.task_id,
            source.to_string(),
            created.target_reference,
            Utc::now(),
        );
        self.polling.track(&task).await;
        self.polling.watch_task(task.id.clone());
        self.polling.wake();
        Ok(task)
    }

    /// Cancel a queued or running task.
    ///
    /// Fails with `InvalidState` if the task already finished.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<(), CoordinatorError> {
        if self.polling.is_shut_down() {
            return Err(CoordinatorError::ShutDown);
        }

        self.client.cancel_task(task_id).await?;
        info!(task_id = %task_id, "Transfer task cancelled");

        self.polling.stop_watch(task_id);
        match self.polling.reconcile().await {
            Ok(_) => {}
            // Reported to subscribers as SessionExpired.
            Err(e) if e.is_unauthorized() => {}
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Reconciliation after cancel failed");
            }
        }
        Ok(())
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.polling.snapshot()
    }

    /// Receiver notified whenever the snapshot changes.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.polling.subscribe_snapshots()
    }

    /// Receiver for terminal-task and session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.polling.subscribe_events()
    }

    pub fn polling(&self) -> &PollingCoordinator {
        &self.polling
    }

    /// Stop all polling and release pending timers.
    pub async fn shutdown(&self) {
        self.polling.shutdown().await;
    }
}
