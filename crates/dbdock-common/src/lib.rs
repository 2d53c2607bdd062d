// Shared types for the dbdock workspace: instances, log entries, container records
// and the error taxonomy every crate reports through.

use std::path::PathBuf;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

mod container;
mod instance;
mod logs;

pub use container::{ContainerConfigSnapshot, ContainerRecord, ContainerState, ContainerStatus, ImageRef};
pub use instance::{ConnectionOutcome, Credentials, DatabaseKind, InstanceStatus, ManagedInstance};
pub use logs::{LogEntry, LogKind};

#[derive(Error, Debug)]
pub enum DockError {
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Image provisioning failed for {image}: {message}")]
    ImageProvisionFailure { image: String, message: String },

    #[error("Container {operation} failed for {target}: {message}")]
    ContainerOperationFailure {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Volume directory {} could not be prepared: {source}", path.display())]
    VolumeSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log stream for {instance} failed: {message}")]
    StreamReadFailure { instance: String, message: String },

    #[error("Instance {instance} cannot {action} while {from}")]
    InvalidTransition {
        instance: String,
        from: InstanceStatus,
        action: &'static str,
    },

    #[error("Unsupported database type: '{0}'")]
    UnsupportedKind(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DockError>;

/// Receives human-readable progress messages during long-running operations.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_progress_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |message: &str| seen.lock().unwrap().push(message.to_string());
        sink.report("Pulling image redis:7.0...");
        NoProgress.report("dropped");
        assert_eq!(*seen.lock().unwrap(), vec!["Pulling image redis:7.0...".to_string()]);
    }

    #[test]
    fn errors_render_their_context() {
        let err = DockError::ContainerOperationFailure {
            operation: "create",
            target: "dbdock-redis-redis".to_string(),
            message: "port is already allocated".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Container create failed for dbdock-redis-redis: port is already allocated"
        );

        let err = DockError::InvalidTransition {
            instance: "Redis".to_string(),
            from: InstanceStatus::Starting,
            action: "start",
        };
        assert_eq!(err.to_string(), "Instance Redis cannot start while Starting");
    }
}
