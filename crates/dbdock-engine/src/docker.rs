use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{ContainerSummary, HostConfig, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use dbdock_common::{ContainerRecord, ContainerState, ImageRef};
use futures::stream::BoxStream;
use futures::{ready, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, instrument};

use crate::engine::{ContainerEngine, ContainerSpec, EngineError, LogOptions, LogReader, PullProgress};
use crate::logs::{encode_frame, StreamSource};

impl From<BollardError> for EngineError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError { status_code, message } => {
                EngineError::Api { status: status_code, message }
            }
            err @ (BollardError::IOError { .. } | BollardError::HyperResponseError { .. }) => {
                EngineError::Unavailable(err.to_string())
            }
            other => EngineError::Other(other.to_string()),
        }
    }
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(err, BollardError::DockerResponseServerError { status_code: 304, .. })
}

/// `ContainerEngine` backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Arc<Docker>,
}

impl DockerEngine {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    /// Connects through the platform's default socket or named pipe.
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(Arc::new(docker)))
    }

    pub fn client(&self) -> &Arc<Docker> {
        &self.docker
    }

    async fn list(&self, key: &str, value: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        let filters = HashMap::from([(key.to_string(), vec![value.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;
        Ok(containers)
    }
}

fn to_record(summary: ContainerSummary) -> Option<ContainerRecord> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let state = summary
        .state
        .map(|state| ContainerState::parse(&state))
        .unwrap_or_else(|| ContainerState::Unknown(String::new()));
    Some(ContainerRecord { id, name, state })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_container(&self, name: &str) -> Result<Option<ContainerRecord>, EngineError> {
        // The name filter matches substrings; keep only the exact name.
        let exact = format!("/{name}");
        let found = self
            .list("name", name)
            .await?
            .into_iter()
            .find(|summary| {
                summary
                    .names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| *n == exact))
            })
            .and_then(to_record);
        Ok(found)
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, EngineError> {
        let found = self
            .list("id", id)
            .await?
            .into_iter()
            .find(|summary| summary.id.as_deref().is_some_and(|full| full.starts_with(id)))
            .and_then(to_record);
        Ok(found)
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let port_key = spec.port_key();
        let exposed_ports = HashMap::from([(port_key.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        )]);
        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                Config::<String> {
                    image: Some(spec.image.to_string()),
                    env: Some(spec.env.clone()),
                    exposed_ports: Some(exposed_ports),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await?;
        info!(container_id = %created.id, "Container created");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if is_not_modified(&err) => {
                debug!(container_id = %id, "Container already running");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn unpause_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.unpause_container(id).await?;
        info!(container_id = %id, "Container unpaused");
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(err) if is_not_modified(&err) => {
                debug!(container_id = %id, "Container already stopped");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, EngineError> {
        let filters = HashMap::from([("reference".to_string(), vec![image.to_string()])]);
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await?;
        Ok(!images.is_empty())
    }

    fn pull_image(&self, image: &ImageRef) -> BoxStream<'static, Result<PullProgress, EngineError>> {
        let options = CreateImageOptions {
            from_image: image.name.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map_ok(|info| {
                let detail = info.progress_detail.unwrap_or_default();
                PullProgress {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                    current: detail.current,
                    total: detail.total,
                }
            })
            .map_err(EngineError::from)
            .boxed()
    }

    async fn container_logs(&self, id: &str, options: &LogOptions) -> Result<LogReader, EngineError> {
        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: options.stdout,
            stderr: options.stderr,
            since: options.since.map(|at| at.timestamp()).unwrap_or(0),
            timestamps: options.timestamps,
            tail: "all".to_string(),
            ..Default::default()
        };
        let chunks = self
            .docker
            .logs(id, Some(options))
            .map_ok(reframe)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
            .boxed();
        Ok(Box::new(ChunkReader::new(chunks)))
    }
}

/// Bollard has already split the stream; put the framing back so the
/// demuxer stays the only decoding path.
fn reframe(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdErr { message } => encode_frame(StreamSource::Stderr, &message),
        LogOutput::StdIn { message } => encode_frame(StreamSource::Stdin, &message),
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            encode_frame(StreamSource::Stdout, &message)
        }
    }
}

/// Adapts a stream of byte chunks into `AsyncRead`.
pub struct ChunkReader {
    chunks: BoxStream<'static, io::Result<Bytes>>,
    pending: Bytes,
}

impl ChunkReader {
    pub fn new(chunks: BoxStream<'static, io::Result<Bytes>>) -> Self {
        Self {
            chunks,
            pending: Bytes::new(),
        }
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }
            match ready!(self.chunks.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
