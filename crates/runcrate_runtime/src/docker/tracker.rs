use crate::docker::{docker_command, docker_output, piped, stream_combined_output};
use crate::{ContainerHandle, RuntimeError, TrackedProcess, Tracker};
use anyhow::{Context, Result};
use async_trait::async_trait;
use runcrate_model::{JobStatus, LogSink};
use tracing::{debug, info};

const TARGET: &str = "runtime::tracker";

/// Locates the spawned container by name and awaits its termination while
/// relaying its combined output.
#[derive(Debug, Clone, Default)]
pub struct DockerTracker;

#[async_trait]
impl Tracker for DockerTracker {
    async fn track(&self, handle: &ContainerHandle) -> Result<Box<dyn TrackedProcess>> {
        let listed = docker_output(&[
            "ps",
            "--filter",
            &format!("name={}", handle.name),
            "--format",
            "{{.ID}}",
        ])
        .await?;
        let container_id = match listed.lines().next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(RuntimeError::ProcessNotFound(handle.name.clone()).into()),
        };
        debug!(target: TARGET, container = %container_id, name = %handle.name, "tracking");
        Ok(Box::new(DockerProcess { container_id }))
    }
}

struct DockerProcess {
    container_id: String,
}

#[async_trait]
impl TrackedProcess for DockerProcess {
    async fn wait(&mut self, sink: &dyn LogSink) -> Result<i64> {
        let child = piped(docker_command(&["logs", "-f", &self.container_id]))
            .spawn()
            .with_context(|| format!("following logs of {}", self.container_id))?;
        stream_combined_output(child, |line| sink.emit(JobStatus::Running, line)).await?;

        // `docker wait` returns immediately once the log stream has ended.
        let code = docker_output(&["wait", &self.container_id])
            .await?
            .parse::<i64>()
            .context("parsing container exit code")?;
        info!(target: TARGET, container = %self.container_id, code, "process finished");
        Ok(code)
    }
}
