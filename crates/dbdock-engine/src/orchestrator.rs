use std::sync::Arc;

use dashmap::DashMap;
use dbdock_common::{
    ContainerRecord, ContainerState, ContainerStatus, DockError, InstanceStatus, ManagedInstance,
    ProgressSink, Result,
};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::DockConfig;
use crate::engine::ContainerEngine;
use crate::logs::{LogStore, LogStreamManager};
use crate::provision::ImageProvisioner;
use crate::template::{container_name, ContainerTemplate};

/// Drives database containers through their lifecycle and keeps one log
/// stream attached per running instance.
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    provisioner: ImageProvisioner,
    streams: LogStreamManager,
    logs: Arc<LogStore>,
    config: DockConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: DockConfig) -> Self {
        let logs = Arc::new(LogStore::new(config.log_capacity));
        let streams = LogStreamManager::new(engine.clone(), logs.clone(), &config);
        Self {
            provisioner: ImageProvisioner::new(engine.clone()),
            engine,
            streams,
            logs,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn streams(&self) -> &LogStreamManager {
        &self.streams
    }

    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    pub fn container_name(&self, instance: &ManagedInstance) -> String {
        container_name(&self.config.container_prefix, instance.kind, &instance.name)
    }

    fn lock_for(&self, instance: &str) -> Arc<Mutex<()>> {
        self.locks.entry(instance.to_string()).or_default().clone()
    }

    #[instrument(skip(self))]
    pub async fn check_engine(&self) -> Result<()> {
        match self.engine.ping().await {
            Ok(()) => {
                self.logs.info(None, "Docker is running");
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.logs.error(None, format!("Docker is not available: {message}"));
                Err(DockError::EngineUnavailable(message))
            }
        }
    }

    /// Creates or reuses the instance's container, starts it and attaches its
    /// log stream. Returns the container id.
    #[instrument(skip(self, instance, progress), fields(instance = %instance.name))]
    pub async fn start(&self, instance: &ManagedInstance, progress: &dyn ProgressSink) -> Result<String> {
        let lock = self.lock_for(&instance.name);
        let _guard = lock.lock().await;

        let name = instance.name.as_str();
        let template = ContainerTemplate::for_instance(instance, &self.config.container_prefix);
        self.logs.info(
            Some(name),
            format!("Starting {} {}", instance.kind.display_name(), instance.version),
        );

        self.provisioner.ensure_image(&template.image, progress).await?;

        if let Some((path, _)) = &template.volume {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|source| DockError::VolumeSetup {
                    path: path.clone(),
                    source,
                })?;
        }

        let target = template.container_name.as_str();
        let existing = self
            .engine
            .find_container(target)
            .await
            .map_err(|e| e.during("lookup", target))?;

        let container_id = match existing {
            Some(record) => self.resume(record, target, progress).await?,
            None => {
                progress.report(&format!("Creating container {target}..."));
                match self.engine.create_container(&template.to_spec()).await {
                    Ok(id) => {
                        progress.report(&format!("Starting container {target}..."));
                        self.engine
                            .start_container(&id)
                            .await
                            .map_err(|e| e.during("start", target))?;
                        id
                    }
                    Err(err) if err.is_conflict() => {
                        // Created by someone else since the lookup.
                        warn!(error = %err, "Container name already taken, reusing it");
                        let record = self
                            .engine
                            .find_container(target)
                            .await
                            .map_err(|e| e.during("lookup", target))?
                            .ok_or_else(|| err.during("create", target))?;
                        self.resume(record, target, progress).await?
                    }
                    Err(err) => return Err(err.during("create", target)),
                }
            }
        };

        info!(%container_id, "Container running");
        self.logs.config_snapshot(&template.snapshot(instance, &container_id));

        if self.streams.attached_container(name).as_deref() != Some(container_id.as_str()) {
            if let Err(err) = self.streams.attach(&container_id, name).await {
                warn!(error = %err, "Could not attach log stream");
                self.logs.warning(Some(name), format!("Could not attach log stream: {err}"));
            }
        }

        progress.report(&format!("{name} is running"));
        Ok(container_id)
    }

    /// Brings an existing container back to running and returns its id.
    async fn resume(&self, record: ContainerRecord, target: &str, progress: &dyn ProgressSink) -> Result<String> {
        match record.state {
            ContainerState::Running => {
                info!(container_id = %record.id, "Container already running");
                progress.report(&format!("Container {target} is already running"));
            }
            ContainerState::Paused => {
                progress.report(&format!("Unpausing container {target}..."));
                self.engine
                    .unpause_container(&record.id)
                    .await
                    .map_err(|e| e.during("unpause", target))?;
            }
            _ => {
                progress.report(&format!("Starting existing container {target}..."));
                self.engine
                    .start_container(&record.id)
                    .await
                    .map_err(|e| e.during("start", target))?;
            }
        }
        Ok(record.id)
    }

    /// Detaches the log stream, then stops the container gracefully.
    #[instrument(skip(self))]
    pub async fn stop(&self, container_id: &str, instance_name: &str) -> Result<()> {
        let lock = self.lock_for(instance_name);
        let _guard = lock.lock().await;

        self.streams.detach(instance_name).await;
        self.logs.info(Some(instance_name), "Stopping container");
        self.engine
            .stop_container(container_id, self.config.stop_grace)
            .await
            .map_err(|e| e.during("stop", container_id))?;
        info!("Container stopped");
        self.logs.info(Some(instance_name), "Container stopped");
        Ok(())
    }

    pub async fn status(&self, container_id: &str) -> ContainerStatus {
        match self.engine.inspect_container(container_id).await {
            Ok(Some(record)) => ContainerStatus::State(record.state),
            Ok(None) => ContainerStatus::NotFound,
            Err(err) => ContainerStatus::Error(err.to_string()),
        }
    }

    /// Reconciles idle instances with what the engine reports. Instances with
    /// an operation in flight are left alone.
    #[instrument(skip_all, fields(count = instances.len()))]
    pub async fn refresh_status(&self, instances: &mut [ManagedInstance]) {
        for instance in instances.iter_mut() {
            if instance.status.is_busy() {
                continue;
            }
            let lock = self.lock_for(&instance.name);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };

            let observed = match instance.container_id.clone() {
                Some(id) => self.status(&id).await,
                None => {
                    let target = self.container_name(instance);
                    match self.engine.find_container(&target).await {
                        Ok(Some(record)) => {
                            info!(instance = %instance.name, container_id = %record.id, "Adopting existing container");
                            instance.container_id = Some(record.id);
                            ContainerStatus::State(record.state)
                        }
                        Ok(None) => ContainerStatus::NotFound,
                        Err(err) => ContainerStatus::Error(err.to_string()),
                    }
                }
            };

            if let Err(err) = instance.observe(&observed) {
                warn!(error = %err, "Skipping status update");
                continue;
            }

            match (instance.status, instance.container_id.clone()) {
                (InstanceStatus::Running, Some(id)) => {
                    if self.streams.attached_container(&instance.name).as_deref() != Some(id.as_str()) {
                        if let Err(err) = self.streams.attach(&id, &instance.name).await {
                            self.logs.warning(
                                Some(&instance.name),
                                format!("Could not attach log stream: {err}"),
                            );
                        }
                    }
                }
                _ => {
                    self.streams.detach(&instance.name).await;
                }
            }
        }
    }

    /// `start` wrapped in the instance's state machine.
    pub async fn start_instance(
        &self,
        instance: &mut ManagedInstance,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        instance.begin_start()?;
        match self.start(instance, progress).await {
            Ok(id) => {
                instance.mark_running(id.clone())?;
                Ok(id)
            }
            Err(err) => {
                self.logs.error(
                    Some(&instance.name),
                    format!("Failed to start {}: {err}", instance.name),
                );
                instance.mark_failed(err.to_string())?;
                Err(err)
            }
        }
    }

    /// `stop` wrapped in the instance's state machine.
    pub async fn stop_instance(&self, instance: &mut ManagedInstance) -> Result<()> {
        let container_id = instance.begin_stop()?;
        match self.stop(&container_id, &instance.name).await {
            Ok(()) => instance.mark_stopped(),
            Err(err) => {
                self.logs.error(
                    Some(&instance.name),
                    format!("Failed to stop {}: {err}", instance.name),
                );
                instance.mark_failed(err.to_string())?;
                Err(err)
            }
        }
    }

    /// Starts every instance that is not running; failures are collected.
    pub async fn start_all(
        &self,
        instances: &mut [ManagedInstance],
        progress: &dyn ProgressSink,
    ) -> Vec<(String, DockError)> {
        let mut failures = Vec::new();
        for instance in instances.iter_mut() {
            if !matches!(instance.status, InstanceStatus::Stopped | InstanceStatus::Error) {
                continue;
            }
            if let Err(err) = self.start_instance(instance, progress).await {
                failures.push((instance.name.clone(), err));
            }
        }
        failures
    }

    /// Stops every running instance; failures are collected.
    pub async fn stop_all(&self, instances: &mut [ManagedInstance]) -> Vec<(String, DockError)> {
        let mut failures = Vec::new();
        for instance in instances.iter_mut() {
            if instance.status != InstanceStatus::Running {
                continue;
            }
            if let Err(err) = self.stop_instance(instance).await {
                failures.push((instance.name.clone(), err));
            }
        }
        failures
    }

    /// Stores a connection test result reported by an external client.
    pub fn record_connection_outcome(
        &self,
        instance: &mut ManagedInstance,
        success: bool,
        message: impl Into<String>,
    ) {
        let message = message.into();
        if success {
            self.logs.info(Some(&instance.name), format!("Connection test succeeded: {message}"));
        } else {
            self.logs.error(Some(&instance.name), format!("Connection test failed: {message}"));
        }
        instance.record_connection(success, message);
    }

    /// Detaches every log stream.
    pub async fn shutdown(&self) {
        let detached = self.streams.detach_all().await;
        info!(detached, "Orchestrator shut down");
    }
}
