use std::path::PathBuf;

use dbdock_common::{ContainerConfigSnapshot, DatabaseKind, ImageRef, ManagedInstance};
use sha2::{Digest, Sha256};

use crate::engine::ContainerSpec;

/// Deterministic container name: `{prefix}-{kind}-{slug(name)}`.
///
/// Slugging is lossy, so whenever it rewrote the instance name the first
/// eight hex digits of the name's SHA-256 are appended. Two instance names
/// never share a container.
pub fn container_name(prefix: &str, kind: DatabaseKind, instance: &str) -> String {
    let slug = slug(instance);
    if slug == instance {
        format!("{prefix}-{kind}-{slug}")
    } else {
        format!("{prefix}-{kind}-{slug}-{}", name_digest(instance))
    }
}

fn name_digest(name: &str) -> String {
    Sha256::digest(name.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '-',
        })
        .collect()
}

/// Launch parameters resolved from an instance's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTemplate {
    pub container_name: String,
    pub image: ImageRef,
    pub env: Vec<String>,
    pub container_port: u16,
    pub host_port: u16,
    /// Host directory and the container data dir it is mounted on.
    pub volume: Option<(PathBuf, &'static str)>,
}

impl ContainerTemplate {
    pub fn for_instance(instance: &ManagedInstance, prefix: &str) -> Self {
        let kind = instance.kind;
        Self {
            container_name: container_name(prefix, kind, &instance.name),
            image: instance.image_ref(),
            env: kind.required_env(&instance.credentials),
            container_port: kind.native_port(),
            host_port: instance.port,
            volume: instance
                .volume_path
                .clone()
                .filter(|path| !path.as_os_str().is_empty())
                .map(|path| (path, kind.data_dir())),
        }
    }

    pub fn to_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            env: self.env.clone(),
            container_port: self.container_port,
            host_port: self.host_port,
            binds: self
                .volume
                .iter()
                .map(|(host, data_dir)| format!("{}:{data_dir}", host.display()))
                .collect(),
        }
    }

    pub fn snapshot(&self, instance: &ManagedInstance, container_id: &str) -> ContainerConfigSnapshot {
        ContainerConfigSnapshot {
            instance: instance.name.clone(),
            kind: instance.kind,
            container_name: self.container_name.clone(),
            container_id: container_id.to_string(),
            image: self.image.clone(),
            host_port: self.host_port,
            volume: self
                .volume
                .as_ref()
                .map(|(host, data_dir)| (host.clone(), data_dir.to_string())),
            env: self.env.clone(),
            connection_string: instance.connection_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic_slugs() {
        assert_eq!(container_name("dbdock", DatabaseKind::Redis, "cache"), "dbdock-redis-cache");
        assert_eq!(
            container_name("dbdock", DatabaseKind::Redis, "Redis"),
            "dbdock-redis-redis-a7f64157"
        );
        assert_eq!(
            container_name("dbdock", DatabaseKind::Postgresql, " Orders DB #2 "),
            "dbdock-postgresql-orders-db--2-d64e338b"
        );
    }

    #[test]
    fn names_differing_only_in_case_or_punctuation_stay_distinct() {
        let names = ["Cache A", "cache-a", "cache a", "CACHE-A"];
        let mut containers: Vec<_> = names
            .iter()
            .map(|name| container_name("dbdock", DatabaseKind::Redis, name))
            .collect();
        assert_eq!(containers[0], "dbdock-redis-cache-a-a278bac6");
        assert_eq!(containers[1], "dbdock-redis-cache-a");
        containers.sort();
        containers.dedup();
        assert_eq!(containers.len(), names.len());
    }

    #[test]
    fn redis_template_without_volume() {
        let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
        let template = ContainerTemplate::for_instance(&redis, "dbdock");
        assert_eq!(template.image.to_string(), "redis:7.0");
        assert!(template.env.is_empty());
        assert_eq!(template.volume, None);

        let spec = template.to_spec();
        assert_eq!(spec.port_key(), "6379/tcp");
        assert!(spec.binds.is_empty());
    }

    #[test]
    fn volume_binds_to_kind_data_dir() {
        let mut pg = ManagedInstance::defaults_for(DatabaseKind::Postgresql).with_volume("/srv/pg");
        pg.port = 15432;
        let template = ContainerTemplate::for_instance(&pg, "lab");
        let spec = template.to_spec();

        assert_eq!(spec.name, "lab-postgresql-postgresql-cc52d032");
        assert_eq!(spec.binds, vec!["/srv/pg:/var/lib/postgresql/data".to_string()]);
        assert_eq!(spec.container_port, 5432);
        assert_eq!(spec.host_port, 15432);
        assert_eq!(spec.env, vec!["POSTGRES_PASSWORD=postgres".to_string()]);

        let snapshot = template.snapshot(&pg, "c0ffee");
        assert!(snapshot.to_string().contains("POSTGRES_PASSWORD=*****"));
        assert!(snapshot.connection_string.contains("Port=15432"));
    }
}
