use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbdock_common::{ContainerRecord, DockError, ImageRef};
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Raw multiplexed log stream: 8-byte frame headers followed by payloads.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Container engine unreachable: {0}")]
    Unavailable(String),
    #[error("Engine API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Engine error: {0}")]
    Other(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Api { status: 409, .. })
    }

    /// Attaches the failed operation and its target.
    pub fn during(self, operation: &'static str, target: &str) -> DockError {
        match self {
            EngineError::Unavailable(message) => DockError::EngineUnavailable(message),
            other => DockError::ContainerOperationFailure {
                operation,
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<EngineError> for DockError {
    fn from(err: EngineError) -> Self {
        err.during("request", "container engine")
    }
}

/// Everything the engine needs to create one database container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageRef,
    pub env: Vec<String>,
    /// Port the database listens on inside the container.
    pub container_port: u16,
    /// Host port bound to `container_port`.
    pub host_port: u16,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Only entries newer than this; `None` means the whole history.
    pub since: Option<DateTime<Utc>>,
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: true,
            stdout: true,
            stderr: true,
            since: None,
            timestamps: true,
        }
    }
}

/// One low-level event from an image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
    pub current: Option<i64>,
    pub total: Option<i64>,
}

impl PullProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    /// Looks a container up by its exact name.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerRecord>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, EngineError>;

    /// Creates (without starting) and returns the new container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Starting an already running container succeeds.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn unpause_container(&self, id: &str) -> Result<(), EngineError>;

    /// Stopping an already stopped container succeeds.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, EngineError>;

    fn pull_image(&self, image: &ImageRef) -> BoxStream<'static, Result<PullProgress, EngineError>>;

    async fn container_logs(&self, id: &str, options: &LogOptions) -> Result<LogReader, EngineError>;
}
