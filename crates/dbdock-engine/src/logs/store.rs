use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dbdock_common::{ContainerConfigSnapshot, LogEntry, LogKind};
use tracing::{debug, error, info, trace, warn};

use super::ring::RingBuffer;

/// Process-wide bounded log window: one global ring plus one ring per
/// instance, created on first write.
#[derive(Debug)]
pub struct LogStore {
    capacity: usize,
    global: Mutex<RingBuffer<LogEntry>>,
    instances: DashMap<String, RingBuffer<LogEntry>>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            global: Mutex::new(RingBuffer::new(capacity)),
            instances: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, entry: LogEntry) {
        mirror(&entry);
        if let Some(name) = &entry.instance {
            self.instances
                .entry(name.clone())
                .or_insert_with(|| RingBuffer::new(self.capacity))
                .push(entry.clone());
        }
        self.global().push(entry);
    }

    pub fn info(&self, instance: Option<&str>, message: impl Into<String>) {
        self.record(LogEntry::new(LogKind::Info, instance, message));
    }

    pub fn warning(&self, instance: Option<&str>, message: impl Into<String>) {
        self.record(LogEntry::new(LogKind::Warning, instance, message));
    }

    pub fn error(&self, instance: Option<&str>, message: impl Into<String>) {
        self.record(LogEntry::new(LogKind::Error, instance, message));
    }

    pub fn container_output_line(&self, instance: &str, line: impl Into<String>) {
        self.record(LogEntry::for_instance(LogKind::ContainerOutput, instance, line));
    }

    pub fn config_snapshot(&self, snapshot: &ContainerConfigSnapshot) {
        self.record(LogEntry::for_instance(
            LogKind::ConfigSnapshot,
            &snapshot.instance,
            snapshot.to_string(),
        ));
    }

    pub fn global_logs(&self) -> Vec<LogEntry> {
        self.global().snapshot()
    }

    pub fn instance_logs(&self, name: &str) -> Vec<LogEntry> {
        self.instances
            .get(name)
            .map(|ring| ring.snapshot())
            .unwrap_or_default()
    }

    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Everything except raw container output.
    pub fn application_logs(&self) -> Vec<LogEntry> {
        self.global_logs()
            .into_iter()
            .filter(|entry| !entry.is_container_output())
            .collect()
    }

    pub fn container_output(&self) -> Vec<LogEntry> {
        self.global_logs()
            .into_iter()
            .filter(LogEntry::is_container_output)
            .collect()
    }

    pub fn clear(&self) {
        self.global().clear();
        self.instances.clear();
    }

    /// Plain-text form used for copying a view out of the application.
    pub fn render(entries: &[LogEntry]) -> String {
        entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn global(&self) -> MutexGuard<'_, RingBuffer<LogEntry>> {
        self.global.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mirror(entry: &LogEntry) {
    let instance = entry.instance.as_deref().unwrap_or("-");
    match entry.kind {
        LogKind::Info => info!(%instance, "{}", entry.message),
        LogKind::Warning => warn!(%instance, "{}", entry.message),
        LogKind::Error => error!(%instance, "{}", entry.message),
        LogKind::ConfigSnapshot => debug!(%instance, "{}", entry.message),
        LogKind::ContainerOutput => trace!(%instance, "{}", entry.message),
    }
}
