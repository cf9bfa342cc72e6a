//! Default strategies backed by the `docker` binary.

mod builder;
mod spawner;
mod tracker;

pub use builder::{BuildLogScanner, DockerImageBuilder};
pub use spawner::DockerSpawner;
pub use tracker::DockerTracker;

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

pub(crate) fn docker_command(args: &[&str]) -> Command {
    let mut command = Command::new(crate::config::docker_bin());
    command.args(args);
    command
}

/// Runs a short docker invocation to completion and returns trimmed stdout.
pub(crate) async fn docker_output(args: &[&str]) -> Result<String> {
    let output = docker_command(args)
        .output()
        .await
        .with_context(|| format!("docker {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "docker {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Consumes the child's combined stdout/stderr line-by-line, then reaps it.
/// Returns the raw exit code (-1 when terminated by signal).
pub(crate) async fn stream_combined_output<F>(mut child: Child, mut on_line: F) -> Result<i64>
where
    F: FnMut(&str),
{
    let stdout = child.stdout.take().context("child stdout not piped")?;
    let stderr = child.stderr.take().context("child stderr not piped")?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;
    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => match line? {
                Some(line) => on_line(&line),
                None => stdout_done = true,
            },
            line = stderr_lines.next_line(), if !stderr_done => match line? {
                Some(line) => on_line(&line),
                None => stderr_done = true,
            },
        }
    }
    let status = child.wait().await.context("waiting for docker process")?;
    Ok(status.code().map(i64::from).unwrap_or(-1))
}

pub(crate) fn piped(mut command: Command) -> Command {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command
}
