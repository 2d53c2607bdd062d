use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerState, ContainerStatus, ImageRef};
use crate::{DockError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[serde(alias = "MySQL")]
    Mysql,
    #[serde(alias = "MSSQL")]
    Mssql,
    #[serde(alias = "postgres", alias = "PostgreSQL")]
    Postgresql,
    #[serde(alias = "Redis")]
    Redis,
}

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 4] = [
        DatabaseKind::Mysql,
        DatabaseKind::Mssql,
        DatabaseKind::Postgresql,
        DatabaseKind::Redis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Mssql => "mssql",
            DatabaseKind::Postgresql => "postgresql",
            DatabaseKind::Redis => "redis",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "MySQL",
            DatabaseKind::Mssql => "MSSQL",
            DatabaseKind::Postgresql => "PostgreSQL",
            DatabaseKind::Redis => "Redis",
        }
    }

    /// Image the engine runs for `version` of this database.
    pub fn image_ref(&self, version: &str) -> ImageRef {
        match self {
            DatabaseKind::Mysql => ImageRef::new("mysql", version),
            DatabaseKind::Mssql => {
                ImageRef::new("mcr.microsoft.com/mssql/server", format!("{version}-latest"))
            }
            DatabaseKind::Postgresql => ImageRef::new("postgres", version),
            DatabaseKind::Redis => ImageRef::new("redis", version),
        }
    }

    /// `KEY=value` pairs the image needs to boot.
    pub fn required_env(&self, credentials: &Credentials) -> Vec<String> {
        let password = &credentials.password;
        match self {
            DatabaseKind::Mysql => vec![format!("MYSQL_ROOT_PASSWORD={password}")],
            DatabaseKind::Mssql => vec![
                "ACCEPT_EULA=Y".to_string(),
                format!("SA_PASSWORD={password}"),
            ],
            DatabaseKind::Postgresql => vec![format!("POSTGRES_PASSWORD={password}")],
            DatabaseKind::Redis => Vec::new(),
        }
    }

    /// Directory inside the container holding the database files.
    pub fn data_dir(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "/var/lib/mysql",
            DatabaseKind::Mssql => "/var/opt/mssql/data",
            DatabaseKind::Postgresql => "/var/lib/postgresql/data",
            DatabaseKind::Redis => "/data",
        }
    }

    /// Port the database listens on inside the container.
    pub fn native_port(&self) -> u16 {
        match self {
            DatabaseKind::Mysql => 3306,
            DatabaseKind::Mssql => 1433,
            DatabaseKind::Postgresql => 5432,
            DatabaseKind::Redis => 6379,
        }
    }

    pub fn default_user(&self) -> Option<&'static str> {
        match self {
            DatabaseKind::Mysql => Some("root"),
            DatabaseKind::Mssql => Some("sa"),
            DatabaseKind::Postgresql => Some("postgres"),
            DatabaseKind::Redis => None,
        }
    }

    fn default_version(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "8.0",
            DatabaseKind::Mssql => "2022",
            DatabaseKind::Postgresql => "15",
            DatabaseKind::Redis => "7.0",
        }
    }

    fn default_password(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "12345678",
            DatabaseKind::Mssql => "P@ssw0rd",
            DatabaseKind::Postgresql => "postgres",
            DatabaseKind::Redis => "",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = DockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseKind::Mysql),
            "mssql" => Ok(DatabaseKind::Mssql),
            "postgresql" | "postgres" => Ok(DatabaseKind::Postgresql),
            "redis" => Ok(DatabaseKind::Redis),
            _ => Err(DockError::UnsupportedKind(s.to_string())),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: Option<&str>, password: impl Into<String>) -> Self {
        Self {
            username: username.map(str::to_string),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"*****")
            .finish()
    }
}

/// Result of a connection test performed by an external client library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOutcome {
    pub success: bool,
    pub message: String,
    pub checked_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl InstanceStatus {
    /// An operation owns the instance while it is starting or stopping.
    pub fn is_busy(&self) -> bool {
        matches!(self, InstanceStatus::Starting | InstanceStatus::Stopping)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceStatus::Stopped => "Stopped",
            InstanceStatus::Starting => "Starting",
            InstanceStatus::Running => "Running",
            InstanceStatus::Stopping => "Stopping",
            InstanceStatus::Error => "Error",
        };
        f.write_str(label)
    }
}

/// A configured database container and its last known lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedInstance {
    pub name: String,
    pub kind: DatabaseKind,
    pub version: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_path: Option<PathBuf>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionOutcome>,
}

impl ManagedInstance {
    pub fn new(name: impl Into<String>, kind: DatabaseKind, version: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.into(),
            port,
            volume_path: None,
            credentials: Credentials::new(kind.default_user(), kind.default_password()),
            container_id: None,
            status: InstanceStatus::Stopped,
            last_error: None,
            connection: None,
        }
    }

    /// Factory defaults for one database kind.
    pub fn defaults_for(kind: DatabaseKind) -> Self {
        Self::new(kind.display_name(), kind, kind.default_version(), kind.native_port())
    }

    /// One default instance per supported kind.
    pub fn default_set() -> Vec<Self> {
        DatabaseKind::ALL.iter().map(|kind| Self::defaults_for(*kind)).collect()
    }

    pub fn with_volume(mut self, path: impl Into<PathBuf>) -> Self {
        self.volume_path = Some(path.into());
        self
    }

    pub fn image_ref(&self) -> ImageRef {
        self.kind.image_ref(&self.version)
    }

    pub fn connection_string(&self) -> String {
        let port = self.port;
        let password = &self.credentials.password;
        match self.kind {
            DatabaseKind::Mysql => format!(
                "Server=localhost;Port={port};Database=mysql;User=root;Password={password};"
            ),
            DatabaseKind::Mssql => format!(
                "Server=localhost,{port};Database=master;User Id=sa;Password={password};TrustServerCertificate=True;"
            ),
            DatabaseKind::Postgresql => format!(
                "Host=localhost;Port={port};Database=postgres;Username=postgres;Password={password};"
            ),
            DatabaseKind::Redis if password.is_empty() => format!("localhost:{port}"),
            DatabaseKind::Redis => format!("localhost:{port},password={password}"),
        }
    }

    pub fn begin_start(&mut self) -> Result<()> {
        match self.status {
            InstanceStatus::Stopped | InstanceStatus::Error => {
                self.status = InstanceStatus::Starting;
                self.last_error = None;
                Ok(())
            }
            from => Err(self.invalid(from, "start")),
        }
    }

    pub fn mark_running(&mut self, container_id: impl Into<String>) -> Result<()> {
        match self.status {
            InstanceStatus::Starting => {
                self.status = InstanceStatus::Running;
                self.container_id = Some(container_id.into());
                Ok(())
            }
            from => Err(self.invalid(from, "finish starting")),
        }
    }

    /// Moves to `Stopping` and hands back the container to stop.
    pub fn begin_stop(&mut self) -> Result<String> {
        match (self.status, self.container_id.clone()) {
            (InstanceStatus::Running | InstanceStatus::Error, Some(id)) => {
                self.status = InstanceStatus::Stopping;
                Ok(id)
            }
            (from, _) => Err(self.invalid(from, "stop")),
        }
    }

    pub fn mark_stopped(&mut self) -> Result<()> {
        match self.status {
            InstanceStatus::Stopping => {
                self.status = InstanceStatus::Stopped;
                Ok(())
            }
            from => Err(self.invalid(from, "finish stopping")),
        }
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<()> {
        match self.status {
            InstanceStatus::Starting | InstanceStatus::Stopping => {
                self.status = InstanceStatus::Error;
                self.last_error = Some(message.into());
                Ok(())
            }
            from => Err(self.invalid(from, "fail")),
        }
    }

    /// Applies what the engine reported about the instance's container.
    pub fn observe(&mut self, status: &ContainerStatus) -> Result<()> {
        if self.status.is_busy() {
            return Err(self.invalid(self.status, "refresh"));
        }
        match status {
            ContainerStatus::State(ContainerState::Running) => {
                self.status = InstanceStatus::Running;
                self.last_error = None;
            }
            ContainerStatus::State(_) => self.status = InstanceStatus::Stopped,
            ContainerStatus::NotFound => {
                self.container_id = None;
                self.status = InstanceStatus::Stopped;
            }
            ContainerStatus::Error(message) => {
                self.status = InstanceStatus::Error;
                self.last_error = Some(message.clone());
            }
        }
        Ok(())
    }

    pub fn record_connection(&mut self, success: bool, message: impl Into<String>) {
        self.connection = Some(ConnectionOutcome {
            success,
            message: message.into(),
            checked_at: Local::now(),
        });
    }

    fn invalid(&self, from: InstanceStatus, action: &'static str) -> DockError {
        DockError::InvalidTransition {
            instance: self.name.clone(),
            from,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_template_has_no_env_and_data_dir() {
        let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
        assert_eq!(redis.version, "7.0");
        assert_eq!(redis.image_ref().to_string(), "redis:7.0");
        assert!(redis.kind.required_env(&redis.credentials).is_empty());
        assert_eq!(redis.kind.data_dir(), "/data");
        assert_eq!(redis.connection_string(), "localhost:6379");
    }

    #[test]
    fn mssql_image_carries_latest_suffix() {
        let image = DatabaseKind::Mssql.image_ref("2022");
        assert_eq!(image.name, "mcr.microsoft.com/mssql/server");
        assert_eq!(image.tag, "2022-latest");
        let env = DatabaseKind::Mssql.required_env(&Credentials::new(Some("sa"), "pw"));
        assert_eq!(env, vec!["ACCEPT_EULA=Y".to_string(), "SA_PASSWORD=pw".to_string()]);
    }

    #[test]
    fn kind_parsing_is_case_insensitive() {
        assert_eq!(" PostgreSQL ".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgresql);
        assert_eq!("postgres".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgresql);
        assert_eq!("MySQL".parse::<DatabaseKind>().unwrap(), DatabaseKind::Mysql);
        assert!(matches!(
            "oracle".parse::<DatabaseKind>(),
            Err(DockError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn lifecycle_follows_the_state_machine() {
        let mut pg = ManagedInstance::defaults_for(DatabaseKind::Postgresql);
        pg.begin_start().unwrap();
        assert!(pg.begin_start().is_err());
        pg.mark_running("abc123").unwrap();
        assert_eq!(pg.status, InstanceStatus::Running);
        assert_eq!(pg.container_id.as_deref(), Some("abc123"));

        assert_eq!(pg.begin_stop().unwrap(), "abc123");
        pg.mark_stopped().unwrap();
        assert_eq!(pg.status, InstanceStatus::Stopped);
        assert!(pg.mark_stopped().is_err());
    }

    #[test]
    fn failures_land_in_error_and_allow_retry() {
        let mut mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql);
        mysql.begin_start().unwrap();
        mysql.mark_failed("pull failed").unwrap();
        assert_eq!(mysql.status, InstanceStatus::Error);
        assert_eq!(mysql.last_error.as_deref(), Some("pull failed"));

        // No container yet, so there is nothing to stop.
        assert!(mysql.begin_stop().is_err());
        mysql.begin_start().unwrap();
        assert!(mysql.last_error.is_none());
    }

    #[test]
    fn observation_is_refused_mid_operation() {
        let mut redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
        redis.container_id = Some("c1".to_string());
        redis.observe(&ContainerStatus::State(ContainerState::Running)).unwrap();
        assert_eq!(redis.status, InstanceStatus::Running);

        redis.observe(&ContainerStatus::NotFound).unwrap();
        assert_eq!(redis.status, InstanceStatus::Stopped);
        assert!(redis.container_id.is_none());

        redis.begin_start().unwrap();
        assert!(redis.observe(&ContainerStatus::NotFound).is_err());
    }

    #[test]
    fn credentials_debug_masks_password() {
        let creds = Credentials::new(Some("root"), "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn instances_roundtrip_through_json() {
        let mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql).with_volume("/srv/mysql");
        let json = serde_json::to_string(&mysql).unwrap();
        assert!(json.contains("\"kind\":\"mysql\""));
        let back: ManagedInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mysql);
    }
}
