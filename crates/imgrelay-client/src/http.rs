//! HTTP client for the task service REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use imgrelay_core::{Task, TaskId, TaskListing, TaskStats};

use crate::error::RemoteError;
use crate::types::{CreateTaskRequest, CreatedTask, Envelope};
use crate::TaskClient;

/// Connection settings for [`HttpTaskClient`].
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Service base URL, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,

    /// Bearer token for the `Authorization` header.
    pub token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token: None,
            timeout: Duration::from_secs(300),
        }
    }
}

/// [`TaskClient`] over the REST API.
pub struct HttpTaskClient {
    inner: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskClient {
    /// Create a new HTTP client.
    pub fn new(config: HttpClientConfig) -> Result<Self, RemoteError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    /// Check `/health`. Succeeds only on a 2xx answer; the body is ignored.
    pub async fn health(&self) -> Result<(), RemoteError> {
        let url = self.url("/health");
        debug!(url = %url, "GET request");

        let status = self.inner.get(&url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_for_status(status, format!("health check returned {}", status)))
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Envelope<T>, RemoteError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
                .ok()
                .map(|envelope| envelope.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| status.to_string());
            return Err(error_for_status(status, message));
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Protocol(e.to_string()))?;
        if !envelope.success {
            return Err(RemoteError::InvalidRequest(envelope.message));
        }
        Ok(envelope)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        self.execute::<T>(request)
            .await?
            .data
            .ok_or_else(|| RemoteError::Protocol("response has no data".to_string()))
    }
}

#[async_trait]
impl TaskClient for HttpTaskClient {
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreatedTask, RemoteError> {
        let url = self.url("/api/tasks");
        debug!(url = %url, source = %request.source_reference, "POST request");
        self.fetch(self.inner.post(&url).json(request)).await
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<Task, RemoteError> {
        let url = self.url(&format!("/api/tasks/{}", task_id));
        debug!(url = %url, "GET request");
        self.fetch(self.inner.get(&url)).await
    }

    async fn list_tasks(&self) -> Result<TaskListing, RemoteError> {
        let url = self.url("/api/tasks");
        debug!(url = %url, "GET request");
        self.fetch(self.inner.get(&url)).await
    }

    async fn list_recent_history(&self, limit: usize) -> Result<Vec<Task>, RemoteError> {
        let url = self.url("/api/history");
        debug!(url = %url, limit, "GET request");
        self.fetch(self.inner.get(&url).query(&[("limit", limit)]))
            .await
    }

    async fn get_stats(&self) -> Result<TaskStats, RemoteError> {
        let url = self.url("/api/tasks/stats");
        debug!(url = %url, "GET request");
        self.fetch(self.inner.get(&url)).await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        let url = self.url(&format!("/api/tasks/{}", task_id));
        debug!(url = %url, "DELETE request");
        self.execute::<serde_json::Value>(self.inner.delete(&url))
            .await
            .map(|_| ())
    }
}

fn error_for_status(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::CONFLICT => RemoteError::InvalidState(message),
        s if s.is_server_error() => RemoteError::Unreachable(message),
        _ => RemoteError::InvalidRequest(message),
    }
}
