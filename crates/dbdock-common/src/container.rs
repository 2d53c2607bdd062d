use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::instance::DatabaseKind;

/// Image reference as `name:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Splits on the last `:` after the final `/`, so registry ports are kept
    /// in the name. A missing tag means `latest`.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let path_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[path_start..].rfind(':') {
            Some(offset) => {
                let split = path_start + offset;
                Self::new(&reference[..split], &reference[split + 1..])
            }
            None => Self::new(reference, "latest"),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown(state.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => f.write_str("created"),
            ContainerState::Running => f.write_str("running"),
            ContainerState::Paused => f.write_str("paused"),
            ContainerState::Restarting => f.write_str("restarting"),
            ContainerState::Removing => f.write_str("removing"),
            ContainerState::Exited => f.write_str("exited"),
            ContainerState::Dead => f.write_str("dead"),
            ContainerState::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

/// Engine-reported container, valid only for the query that fetched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    State(ContainerState),
    NotFound,
    Error(String),
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::State(state) => state.fmt(f),
            ContainerStatus::NotFound => f.write_str("Not Found"),
            ContainerStatus::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// What a container was launched with, recorded when it is created or reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfigSnapshot {
    pub instance: String,
    pub kind: DatabaseKind,
    pub container_name: String,
    pub container_id: String,
    pub image: ImageRef,
    pub host_port: u16,
    pub volume: Option<(PathBuf, String)>,
    pub env: Vec<String>,
    pub connection_string: String,
}

const MASK: &str = "*****";

/// Masks the value of any `KEY=value` pair whose key mentions a password.
pub(crate) fn mask_env(entry: &str) -> String {
    match entry.split_once('=') {
        Some((key, _)) if key.to_ascii_uppercase().contains("PASSWORD") => {
            format!("{key}={MASK}")
        }
        _ => entry.to_string(),
    }
}

impl fmt::Display for ContainerConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Container configuration for {}", self.instance)?;
        writeln!(f, "  Type: {}", self.kind.display_name())?;
        writeln!(f, "  Container: {} ({})", self.container_name, self.container_id)?;
        writeln!(f, "  Image: {}", self.image)?;
        writeln!(f, "  Port: {}", self.host_port)?;
        match &self.volume {
            Some((host, data_dir)) => writeln!(f, "  Volume: {} -> {}", host.display(), data_dir)?,
            None => writeln!(f, "  Volume: none")?,
        }
        if self.env.is_empty() {
            writeln!(f, "  Environment: none")?;
        } else {
            writeln!(f, "  Environment:")?;
            for entry in &self.env {
                writeln!(f, "    {}", mask_env(entry))?;
            }
        }
        write!(f, "  Connection: {}", self.connection_string)
    }
}
