use crate::config::JOB_LABEL;
use crate::docker::docker_output;
use crate::{ContainerHandle, SpawnSpec, Spawner};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

const TARGET: &str = "runtime::spawner";

// Default notebook-server port inside the spawned image.
const CONTAINER_PORT: u16 = 8888;

/// Starts the execution container detached, named after the job id so the
/// tracker can find it.
#[derive(Debug, Clone, Default)]
pub struct DockerSpawner;

impl DockerSpawner {
    pub fn container_name(job_id: &str) -> String {
        format!("runcrate-{}", job_id)
    }
}

#[async_trait]
impl Spawner for DockerSpawner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, spec: &SpawnSpec) -> Result<ContainerHandle> {
        let name = Self::container_name(&spec.job_id);
        let mut argv: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.clone(),
            "--label".into(),
            format!("{}={}", JOB_LABEL, spec.job_id),
        ];
        for (host_path, container_path) in &spec.mounts {
            argv.push("-v".into());
            argv.push(format!("{}:{}", host_path, container_path));
        }
        if let Some(token) = &spec.rdmfs_token {
            argv.push("-e".into());
            argv.push(format!("RDMFS_TOKEN={}", token));
        }
        argv.push(spec.image.clone());
        argv.extend(spec.cmd.iter().cloned());

        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        docker_output(&args)
            .await
            .with_context(|| format!("starting container {}", name))?;

        let host = docker_output(&[
            "inspect",
            "-f",
            "{{.NetworkSettings.IPAddress}}",
            &name,
        ])
        .await
        .unwrap_or_else(|err| {
            warn!(target: TARGET, %name, %err, "inspect failed, assuming localhost");
            "127.0.0.1".to_string()
        });
        info!(target: TARGET, %name, %host, port = CONTAINER_PORT, "container started");
        Ok(ContainerHandle {
            name,
            host,
            port: CONTAINER_PORT,
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        docker_output(&["rm", "-f", &handle.name])
            .await
            .with_context(|| format!("removing container {}", handle.name))?;
        info!(target: TARGET, name = %handle.name, "container removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_embeds_job_id() {
        assert_eq!(DockerSpawner::container_name("j-42"), "runcrate-j-42");
    }
}
