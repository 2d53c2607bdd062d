use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dbdock_common::{DockError, Result};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::frame::FrameDemuxer;
use super::lines::LineAssembler;
use super::store::LogStore;
use crate::config::DockConfig;
use crate::engine::{ContainerEngine, LogOptions, LogReader};

/// Cooperative cancellation flag shared between a stream handle and its task.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `cancel` has been called, including before this call.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How a stream task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub instance: String,
    pub container_id: String,
    pub generation: u64,
}

struct StreamHandle {
    generation: u64,
    container_id: String,
    cancel: CancelToken,
    task: JoinHandle<StreamEnd>,
}

/// Owns at most one log-follow task per instance name.
pub struct LogStreamManager {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<LogStore>,
    history: Duration,
    timestamps: bool,
    streams: Arc<DashMap<String, StreamHandle>>,
    generation: AtomicU64,
}

impl LogStreamManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, store: Arc<LogStore>, config: &DockConfig) -> Self {
        Self {
            engine,
            store,
            history: config.log_history,
            timestamps: config.log_timestamps,
            streams: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Follows `container_id`'s logs under `instance`, replacing any stream
    /// already registered for that name.
    #[instrument(skip(self))]
    pub async fn attach(&self, container_id: &str, instance: &str) -> Result<StreamInfo> {
        self.detach(instance).await;

        let options = LogOptions {
            follow: true,
            stdout: true,
            stderr: true,
            since: chrono::Duration::from_std(self.history)
                .ok()
                .map(|window| Utc::now() - window),
            timestamps: self.timestamps,
        };
        let reader = self
            .engine
            .container_logs(container_id, &options)
            .await
            .map_err(|e| DockError::StreamReadFailure {
                instance: instance.to_string(),
                message: e.to_string(),
            })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new();
        let (registered_tx, registered) = oneshot::channel();
        let task = tokio::spawn(run_stream(
            registered,
            reader,
            instance.to_string(),
            generation,
            cancel.clone(),
            self.store.clone(),
            self.streams.clone(),
        ));
        let handle = StreamHandle {
            generation,
            container_id: container_id.to_string(),
            cancel,
            task,
        };

        match self.streams.entry(instance.to_string()) {
            Entry::Occupied(mut occupied) => {
                let replaced = occupied.insert(handle);
                replaced.cancel.cancel();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
            }
        }
        // The task may only unregister itself once its handle is in the map.
        let _ = registered_tx.send(());

        self.store.info(Some(instance), "Log stream attached");
        info!(generation, "Log stream attached");
        Ok(StreamInfo {
            instance: instance.to_string(),
            container_id: container_id.to_string(),
            generation,
        })
    }

    /// Cancels the instance's stream and waits for its task to release the
    /// connection. Returns whether a stream was registered.
    pub async fn detach(&self, instance: &str) -> bool {
        let Some((_, handle)) = self.streams.remove(instance) else {
            return false;
        };
        handle.cancel.cancel();
        match handle.task.await {
            Ok(end) => debug!(%instance, ?end, "Log stream task finished"),
            Err(err) => warn!(%instance, error = %err, "Log stream task did not finish cleanly"),
        }
        true
    }

    /// Detaches every stream; returns how many were registered.
    pub async fn detach_all(&self) -> usize {
        let names: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        let mut detached = 0;
        for name in names {
            if self.detach(&name).await {
                detached += 1;
            }
        }
        detached
    }

    pub fn is_attached(&self, instance: &str) -> bool {
        self.streams
            .get(instance)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Container the instance's live stream is bound to.
    pub fn attached_container(&self, instance: &str) -> Option<String> {
        self.streams
            .get(instance)
            .filter(|handle| !handle.task.is_finished())
            .map(|handle| handle.container_id.clone())
    }

    pub fn attached_instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .streams
            .iter()
            .filter(|e| !e.value().task.is_finished())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}

async fn run_stream(
    registered: oneshot::Receiver<()>,
    reader: LogReader,
    instance: String,
    generation: u64,
    cancel: CancelToken,
    store: Arc<LogStore>,
    streams: Arc<DashMap<String, StreamHandle>>,
) -> StreamEnd {
    let _ = registered.await;
    let end = pump(reader, &instance, &cancel, &store).await;
    match &end {
        StreamEnd::Cancelled => store.info(Some(&instance), "Log stream cancelled"),
        StreamEnd::Ended => store.info(Some(&instance), "Log stream ended"),
        StreamEnd::Failed(message) => {
            store.error(Some(&instance), format!("Log stream failed: {message}"))
        }
    }
    // A newer attach may already own the slot.
    streams.remove_if(&instance, |_, handle| handle.generation == generation);
    end
}

async fn pump(reader: LogReader, instance: &str, cancel: &CancelToken, store: &LogStore) -> StreamEnd {
    let mut demuxer = FrameDemuxer::new(reader);
    let mut lines = LineAssembler::new();

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            next = demuxer.next_frame() => next,
        };
        match next {
            Ok(Some(frame)) => {
                if let Some(anomaly) = frame.anomaly {
                    store.warning(Some(instance), format!("Malformed log frame: {anomaly}"));
                }
                for line in lines.push(frame.source, &frame.payload) {
                    store.container_output_line(instance, line);
                }
            }
            Ok(None) => break StreamEnd::Ended,
            Err(err) => break StreamEnd::Failed(err.to_string()),
        }
    };

    for line in lines.finish() {
        store.container_output_line(instance, line);
    }
    end
}
