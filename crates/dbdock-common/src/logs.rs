use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogKind {
    Info,
    Warning,
    Error,
    ContainerOutput,
    ConfigSnapshot,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogKind::Info => "Info",
            LogKind::Warning => "Warning",
            LogKind::Error => "Error",
            LogKind::ContainerOutput => "Container",
            LogKind::ConfigSnapshot => "Config",
        };
        f.write_str(label)
    }
}

/// One immutable log line. `instance` is `None` for application-wide entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub kind: LogKind,
    pub instance: Option<String>,
}

impl LogEntry {
    pub fn new(kind: LogKind, instance: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
            kind,
            instance: instance.map(str::to_string),
        }
    }

    pub fn global(kind: LogKind, message: impl Into<String>) -> Self {
        Self::new(kind, None, message)
    }

    pub fn for_instance(kind: LogKind, instance: &str, message: impl Into<String>) -> Self {
        Self::new(kind, Some(instance), message)
    }

    pub fn is_container_output(&self) -> bool {
        self.kind == LogKind::ContainerOutput
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}]", self.timestamp.format("%Y-%m-%d %H:%M:%S"), self.kind)?;
        if let Some(instance) = &self.instance {
            write!(f, " [{instance}]")?;
        }
        write!(f, " {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_omits_instance_for_global_entries() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut entry = LogEntry::global(LogKind::Info, "Docker is running");
        entry.timestamp = at;
        assert_eq!(entry.to_string(), "[2024-03-09 14:05:07] [Info] Docker is running");

        let mut entry = LogEntry::for_instance(LogKind::ContainerOutput, "Redis", "Ready to accept connections");
        entry.timestamp = at;
        assert_eq!(
            entry.to_string(),
            "[2024-03-09 14:05:07] [Container] [Redis] Ready to accept connections"
        );
        assert!(entry.is_container_output());
    }
}
