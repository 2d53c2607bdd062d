use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dbdock_common::{
    ConnectionOutcome, Credentials, DatabaseKind, InstanceStatus, ManagedInstance,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::InstanceStore;
use crate::{Result, StoreError};

#[derive(Serialize)]
struct SettingsOut<'a> {
    instances: &'a [ManagedInstance],
}

#[derive(Deserialize)]
struct SettingsIn {
    #[serde(default)]
    instances: Vec<StoredInstance>,
}

/// Lenient on-disk record: anything missing falls back to the kind's
/// defaults, and the kind itself may be implied by the name.
#[derive(Deserialize)]
struct StoredInstance {
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    volume_path: Option<PathBuf>,
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    container_id: Option<String>,
    #[serde(default)]
    status: InstanceStatus,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    connection: Option<ConnectionOutcome>,
}

impl StoredInstance {
    fn resolve(self) -> Option<ManagedInstance> {
        let kind = match self.kind.as_deref() {
            Some(raw) => raw.parse().ok(),
            None => infer_kind(&self.name),
        }?;
        let mut instance = ManagedInstance::defaults_for(kind);
        instance.name = self.name;
        if let Some(version) = self.version.filter(|v| !v.trim().is_empty()) {
            instance.version = version;
        }
        if let Some(port) = self.port {
            instance.port = port;
        }
        instance.volume_path = self.volume_path;
        if let Some(credentials) = self.credentials {
            instance.credentials = credentials;
        }
        instance.container_id = self.container_id;
        // A run that died mid-operation leaves nothing in flight.
        instance.status = if self.status.is_busy() {
            InstanceStatus::Stopped
        } else {
            self.status
        };
        instance.last_error = self.last_error;
        instance.connection = self.connection;
        Some(instance)
    }
}

/// Guesses the kind from names such as `MySQL` or `Orders Postgres`.
pub fn infer_kind(name: &str) -> Option<DatabaseKind> {
    if let Ok(kind) = name.parse() {
        return Some(kind);
    }
    let lowered = name.to_lowercase();
    if lowered.contains("postgres") {
        Some(DatabaseKind::Postgresql)
    } else if lowered.contains("mssql") || lowered.contains("sql server") {
        Some(DatabaseKind::Mssql)
    } else if lowered.contains("mysql") {
        Some(DatabaseKind::Mysql)
    } else if lowered.contains("redis") {
        Some(DatabaseKind::Redis)
    } else {
        None
    }
}

/// Pretty JSON settings file holding the instance set.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    volume_root: Option<PathBuf>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            volume_root: None,
        }
    }

    /// Factory instances get `<root>/<kind>` as their volume.
    pub fn with_volume_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.volume_root = Some(root.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> Vec<ManagedInstance> {
        ManagedInstance::default_set()
            .into_iter()
            .map(|instance| match &self.volume_root {
                Some(root) => {
                    let dir = root.join(instance.kind.as_str());
                    instance.with_volume(dir)
                }
                None => instance,
            })
            .collect()
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn parse(text: &str) -> serde_json::Result<Vec<ManagedInstance>> {
    let settings: SettingsIn = serde_json::from_str(text)?;
    let mut instances = Vec::with_capacity(settings.instances.len());
    for stored in settings.instances {
        let name = stored.name.clone();
        match stored.resolve() {
            Some(instance) => instances.push(instance),
            None => warn!(instance = %name, "Skipping instance with unknown database type"),
        }
    }
    Ok(instances)
}

#[async_trait]
impl InstanceStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<ManagedInstance>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let defaults = self.defaults();
                info!(path = %self.path.display(), "No settings file, writing defaults");
                if let Err(err) = self.save(&defaults).await {
                    warn!(error = %err, "Could not write default settings");
                }
                return Ok(defaults);
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Settings unreadable, using defaults");
                return Ok(self.defaults());
            }
        };

        match parse(&text) {
            Ok(instances) => Ok(instances),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Settings corrupt, using defaults");
                Ok(self.defaults())
            }
        }
    }

    async fn save(&self, instances: &[ManagedInstance]) -> Result<()> {
        let body = serde_json::to_vec_pretty(&SettingsOut { instances })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
