use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_HISTORY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CONTAINER_PREFIX: &str = "dbdock";

/// Runtime knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockConfig {
    /// Entries kept per ring buffer.
    pub log_capacity: usize,
    /// How long a stop waits before the engine kills the container.
    pub stop_grace: Duration,
    /// How far back an attached stream replays history.
    pub log_history: Duration,
    pub container_prefix: String,
    /// Ask the engine to prefix each line with its own timestamp.
    pub log_timestamps: bool,
}

impl Default for DockConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            stop_grace: DEFAULT_STOP_GRACE,
            log_history: DEFAULT_LOG_HISTORY,
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            log_timestamps: true,
        }
    }
}

impl DockConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, keeping defaults for missing or
    /// unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let container_prefix = lookup("DBDOCK_CONTAINER_PREFIX")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.container_prefix);
        Self {
            log_capacity: parsed(&lookup, "DBDOCK_LOG_CAPACITY", defaults.log_capacity),
            stop_grace: Duration::from_secs(parsed(
                &lookup,
                "DBDOCK_STOP_GRACE_SECS",
                defaults.stop_grace.as_secs(),
            )),
            log_history: Duration::from_secs(parsed(
                &lookup,
                "DBDOCK_LOG_HISTORY_SECS",
                defaults.log_history.as_secs(),
            )),
            container_prefix,
            log_timestamps: parsed(&lookup, "DBDOCK_LOG_TIMESTAMPS", defaults.log_timestamps),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "Ignoring unparsable setting");
            default
        }),
    }
}
