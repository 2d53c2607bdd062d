//! In-memory `ContainerEngine` for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dbdock_common::{ContainerRecord, ContainerState, ImageRef};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::Semaphore;

use crate::engine::{ContainerEngine, ContainerSpec, EngineError, LogOptions, LogReader, PullProgress};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: usize,
    pub starts: usize,
    pub unpauses: usize,
    pub stops: usize,
    pub pulls: usize,
    pub log_opens: usize,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, ContainerRecord>,
    specs: Vec<ContainerSpec>,
    images: HashSet<String>,
    pull_script: Vec<PullProgress>,
    pull_error: Option<String>,
    unavailable: Option<String>,
    scripted_logs: HashMap<String, Vec<u8>>,
    log_writers: HashMap<String, DuplexStream>,
    fail_logs: bool,
    create_gates: HashMap<String, Arc<Semaphore>>,
    last_log_options: Option<LogOptions>,
    calls: CallCounts,
}

/// Records every call and keeps containers, images and live log pipes in
/// memory.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn creates(&self) -> usize {
        self.calls().creates
    }

    pub fn pulls(&self) -> usize {
        self.calls().pulls
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state().specs.clone()
    }

    pub fn last_log_options(&self) -> Option<LogOptions> {
        self.state().last_log_options.clone()
    }

    pub fn add_image(&self, image: &ImageRef) {
        self.state().images.insert(image.to_string());
    }

    pub fn has_image(&self, image: &ImageRef) -> bool {
        self.state().images.contains(&image.to_string())
    }

    pub fn script_pull(&self, events: Vec<PullProgress>) {
        self.state().pull_script = events;
    }

    pub fn fail_pull(&self, message: &str) {
        self.state().pull_error = Some(message.to_string());
    }

    pub fn set_unavailable(&self, message: Option<&str>) {
        self.state().unavailable = message.map(str::to_string);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.state().fail_logs = fail;
    }

    /// Registers an existing container and returns its id.
    pub fn insert_container(&self, name: &str, state: ContainerState) -> String {
        let mut guard = self.state();
        let id = next_id(&mut guard);
        guard.containers.insert(
            id.clone(),
            ContainerRecord {
                id: id.clone(),
                name: name.to_string(),
                state,
            },
        );
        id
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        if let Some(record) = self.state().containers.get_mut(id) {
            record.state = state;
        }
    }

    pub fn remove_container(&self, id: &str) {
        self.state().containers.remove(id);
    }

    pub fn container_state(&self, id: &str) -> Option<ContainerState> {
        self.state().containers.get(id).map(|r| r.state.clone())
    }

    /// Serves `bytes` once, then EOF, the next time logs of `id` are opened.
    pub fn script_logs(&self, id: &str, bytes: Vec<u8>) {
        self.state().scripted_logs.insert(id.to_string(), bytes);
    }

    /// Takes the writing end of the live log pipe opened for `id`.
    pub fn take_log_writer(&self, id: &str) -> Option<DuplexStream> {
        self.state().log_writers.remove(id)
    }

    /// Makes creates of `name` wait for a permit on the returned semaphore.
    pub fn gate_create(&self, name: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state().create_gates.insert(name.to_string(), gate.clone());
        gate
    }

    fn check_available(&self) -> Result<(), EngineError> {
        match &self.state().unavailable {
            Some(message) => Err(EngineError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

fn next_id(state: &mut FakeState) -> String {
    state.next_id += 1;
    format!("{:012x}", 0xc0ffee_0000u64 + state.next_id)
}

fn not_found(id: &str) -> EngineError {
    EngineError::Api {
        status: 404,
        message: format!("No such container: {id}"),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.check_available()
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerRecord>, EngineError> {
        self.check_available()?;
        Ok(self.state().containers.values().find(|r| r.name == name).cloned())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, EngineError> {
        self.check_available()?;
        Ok(self.state().containers.get(id).cloned())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.check_available()?;
        let gate = self.state().create_gates.get(&spec.name).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?
                .forget();
        }

        let mut state = self.state();
        state.calls.creates += 1;
        if state.containers.values().any(|r| r.name == spec.name) {
            return Err(EngineError::Api {
                status: 409,
                message: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        let id = next_id(&mut state);
        state.containers.insert(
            id.clone(),
            ContainerRecord {
                id: id.clone(),
                name: spec.name.clone(),
                state: ContainerState::Created,
            },
        );
        state.specs.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state();
        state.calls.starts += 1;
        let record = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        record.state = ContainerState::Running;
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state();
        state.calls.unpauses += 1;
        let record = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        if record.state != ContainerState::Paused {
            return Err(EngineError::Api {
                status: 409,
                message: format!("Container {id} is not paused"),
            });
        }
        record.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state();
        state.calls.stops += 1;
        let record = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        record.state = ContainerState::Exited;
        // The daemon closes follow streams when the container stops.
        state.log_writers.remove(id);
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, EngineError> {
        self.check_available()?;
        Ok(self.state().images.contains(&image.to_string()))
    }

    fn pull_image(&self, image: &ImageRef) -> BoxStream<'static, Result<PullProgress, EngineError>> {
        let mut state = self.state();
        state.calls.pulls += 1;
        if let Some(message) = state.unavailable.clone() {
            return stream::once(async move { Err(EngineError::Unavailable(message)) }).boxed();
        }
        let mut events: Vec<Result<PullProgress, EngineError>> =
            state.pull_script.iter().cloned().map(Ok).collect();
        match state.pull_error.clone() {
            Some(message) => events.push(Err(EngineError::Api { status: 404, message })),
            None => {
                state.images.insert(image.to_string());
            }
        }
        stream::iter(events).boxed()
    }

    async fn container_logs(&self, id: &str, options: &LogOptions) -> Result<LogReader, EngineError> {
        self.check_available()?;
        let mut state = self.state();
        state.calls.log_opens += 1;
        state.last_log_options = Some(options.clone());
        if state.fail_logs {
            return Err(EngineError::Api {
                status: 500,
                message: "logs unavailable".to_string(),
            });
        }
        if !state.containers.contains_key(id) {
            return Err(not_found(id));
        }
        if let Some(bytes) = state.scripted_logs.remove(id) {
            return Ok(Box::new(std::io::Cursor::new(bytes)));
        }
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        state.log_writers.insert(id.to_string(), writer);
        Ok(Box::new(reader))
    }
}
