pub mod config;
pub mod docker;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use runcrate_model::{BuildSpec, LogSink};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no image tag detected in build output")]
    BuildFailed,
    #[error("no running process found for container '{0}'")]
    ProcessNotFound(String),
}

/// Everything a spawner needs to start the containerized execution.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub job_id: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// host path -> container path
    pub mounts: Vec<(String, String)>,
    /// credential for mounting the remote filesystem read/write, when the
    /// source lives on the RDM store
    pub rdmfs_token: Option<String>,
}

/// Identity of a started container, as reported by the spawner.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    fn name(&self) -> &'static str;
    /// Builds an image for the spec's repository, forwarding every build-log
    /// line to the sink. Returns the resulting image reference.
    async fn build(&self, spec: &BuildSpec, sink: &dyn LogSink) -> Result<String>;
}

#[async_trait]
pub trait Spawner: Send + Sync {
    fn name(&self) -> &'static str;
    async fn start(&self, spec: &SpawnSpec) -> Result<ContainerHandle>;
    async fn stop(&self, handle: &ContainerHandle) -> Result<()>;
}

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Locates the concrete running process behind the spawner's handle.
    /// [`RuntimeError::ProcessNotFound`] when the runtime shows none.
    async fn track(&self, handle: &ContainerHandle) -> Result<Box<dyn TrackedProcess>>;
}

#[async_trait]
pub trait TrackedProcess: Send {
    /// Relays the process's combined output to the sink until termination
    /// and returns the exit code. The exit code is reported, not interpreted.
    async fn wait(&mut self, sink: &dyn LogSink) -> Result<i64>;
}

pub type DynImageBuilder = Arc<dyn ImageBuilder>;
pub type DynSpawner = Arc<dyn Spawner>;
pub type DynTracker = Arc<dyn Tracker>;
