//! Wire types for the task service API.

use std::fmt;

use serde::{Deserialize, Serialize};

use imgrelay_core::TaskId;

/// How the service should authenticate against the destination registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationCredentials {
    /// A registry configuration saved on the service; it holds the
    /// credentials itself.
    SavedConfig { config_id: String },

    /// Credentials typed in by the operator.
    Manual {
        #[serde(rename = "target_host")]
        host: String,
        #[serde(rename = "target_username")]
        username: String,
        #[serde(rename = "target_password")]
        password: String,
    },
}

impl fmt::Debug for DestinationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SavedConfig { config_id } => f
                .debug_struct("SavedConfig")
                .field("config_id", config_id)
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

/// Body of a task creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "source_image")]
    pub source_reference: String,

    #[serde(rename = "target_image")]
    pub target_reference: String,

    #[serde(flatten)]
    pub destination: DestinationCredentials,
}

/// Service reply to a successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedTask {
    pub task_id: TaskId,

    /// Target reference as recorded by the service.
    #[serde(rename = "target_image")]
    pub target_reference: String,
}

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_config_request_body() {
        let request = CreateTaskRequest {
            source_reference: "docker.io/library/nginx:latest".to_string(),
            target_reference: "harbor.example.com/library/nginx:latest".to_string(),
            destination: DestinationCredentials::SavedConfig {
                config_id: "cfg-1".to_string(),
            },
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["source_image"], "docker.io/library/nginx:latest");
        assert_eq!(body["target_image"], "harbor.example.com/library/nginx:latest");
        assert_eq!(body["config_id"], "cfg-1");
        assert!(body.get("target_password").is_none());
    }

    #[test]
    fn test_manual_request_body() {
        let request = CreateTaskRequest {
            source_reference: "a".to_string(),
            target_reference: "b".to_string(),
            destination: DestinationCredentials::Manual {
                host: "harbor.example.com".to_string(),
                username: "robot".to_string(),
                password: "s3cret".to_string(),
            },
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["target_host"], "harbor.example.com");
        assert_eq!(body["target_username"], "robot");
        assert_eq!(body["target_password"], "s3cret");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = DestinationCredentials::Manual {
            host: "h".to_string(),
            username: "u".to_string(),
            password: "s3cret".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_created_task_response() {
        let created: CreatedTask = serde_json::from_str(
            r#"{"task_id": "t-9", "target_image": "harbor/library/nginx:latest"}"#,
        )
        .unwrap();
        assert_eq!(created.task_id, TaskId::new("t-9"));
    }
}
