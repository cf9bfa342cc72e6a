//! Scripted strategy implementations for tests.

use crate::{ContainerHandle, ImageBuilder, RuntimeError, SpawnSpec, Spawner, TrackedProcess, Tracker};
use anyhow::Result;
use async_trait::async_trait;
use runcrate_model::{BuildSpec, JobStatus, LogSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MockBuilder {
    lines: Vec<String>,
    image: Option<String>,
}

impl MockBuilder {
    pub fn succeeding(image: impl Into<String>, lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            image: Some(image.into()),
        }
    }

    pub fn failing(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            image: None,
        }
    }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
    fn name(&self) -> &'static str {
        "mock-builder"
    }

    async fn build(&self, _spec: &BuildSpec, sink: &dyn LogSink) -> Result<String> {
        for line in &self.lines {
            sink.emit(JobStatus::Building, line);
        }
        match &self.image {
            Some(image) => Ok(image.clone()),
            None => Err(RuntimeError::BuildFailed.into()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MockSpawner {
    pub fail_start: bool,
    pub started: Arc<AtomicBool>,
    pub stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Spawner for MockSpawner {
    fn name(&self) -> &'static str {
        "mock-spawner"
    }

    async fn start(&self, spec: &SpawnSpec) -> Result<ContainerHandle> {
        if self.fail_start {
            anyhow::bail!("mock spawner refused to start");
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(ContainerHandle {
            name: format!("runcrate-{}", spec.job_id),
            host: "127.0.0.1".into(),
            port: 8888,
        })
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockTracker {
    pub lines: Vec<String>,
    pub exit_code: i64,
    pub missing: bool,
}

impl Default for MockTracker {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            exit_code: 0,
            missing: false,
        }
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn track(&self, handle: &ContainerHandle) -> Result<Box<dyn TrackedProcess>> {
        if self.missing {
            return Err(RuntimeError::ProcessNotFound(handle.name.clone()).into());
        }
        Ok(Box::new(MockProcess {
            lines: self.lines.clone(),
            exit_code: self.exit_code,
        }))
    }
}

struct MockProcess {
    lines: Vec<String>,
    exit_code: i64,
}

#[async_trait]
impl TrackedProcess for MockProcess {
    async fn wait(&mut self, sink: &dyn LogSink) -> Result<i64> {
        for line in &self.lines {
            sink.emit(JobStatus::Running, line);
        }
        Ok(self.exit_code)
    }
}
