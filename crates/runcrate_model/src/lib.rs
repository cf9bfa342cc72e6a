use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type JobId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Building,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Building => "building",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "building" => Ok(JobStatus::Building),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

// Persisted by the caller; the pipeline only reads it and reports changes
// through the observer callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub source_url: String,
    #[serde(default)]
    pub use_snapshot: bool,
    #[serde(default)]
    pub notebook: Option<String>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            status: JobStatus::Queued,
            source_url: source_url.into(),
            use_snapshot: false,
            notebook: None,
            result_url: None,
            log: String::new(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerResult {
    pub notebook: String,
    pub result_url: String,
    pub status: JobStatus,
}

// Resolved build input for the image builder. envs and labels are ordered
// so the rendered argv is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSpec {
    pub repo_url: String,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub build_args: Vec<String>,
}

impl BuildSpec {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexLink {
    pub rel: String,
    pub href: String,
}

// One row per completed job in the shared per-folder index document.
// Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCrateIndexEntry {
    pub notebook: String,
    pub id: JobId,
    pub created_at: String,
    pub updated_at: String,
    pub name: String,
    pub status: JobStatus,
    pub links: Vec<IndexLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: JobStatus,
    pub line: String,
}

/// Log-stream callback seam shared by the image builder and the process
/// tracker. Implementations must tolerate being called from any task.
pub trait LogSink: Send + Sync {
    fn emit(&self, status: JobStatus, line: &str);
}

pub struct NoopSink;

impl LogSink for NoopSink {
    fn emit(&self, _status: JobStatus, _line: &str) {}
}
