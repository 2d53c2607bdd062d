// Re-export dependencies potentially needed by consumers (like the CLI)
pub use bollard;
pub use dbdock_common as common;

pub mod config;
pub mod docker;
pub mod engine;
pub mod logs;
pub mod orchestrator;
pub mod provision;
pub mod template;
pub mod test_utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::DockConfig;
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerSpec, EngineError, LogOptions, LogReader, PullProgress};
pub use logs::{
    CancelToken, Frame, FrameAnomaly, FrameDemuxer, FrameError, LineAssembler, LogStore,
    LogStreamManager, RingBuffer, StreamEnd, StreamInfo, StreamSource,
};
pub use orchestrator::Orchestrator;
pub use provision::{ImageOutcome, ImageProvisioner};
pub use template::ContainerTemplate;
