//! The job orchestrator: sequences source resolution, image build, container
//! run, tracking and crate mutation for one job, reporting progress through
//! an observer and the per-job progress channel.

use crate::progress::{ProgressChannel, ProgressRegistry};
use anyhow::{Context, Result};
use runcrate_model::{
    BuildSpec, IndexLink, Job, JobStatus, LogSink, ProgressEvent, RunCrateIndexEntry, RunnerResult,
};
use runcrate_rdm::{locate, mutate, RdmApi, RdmClient, RdmSession};
use runcrate_runtime::{
    docker::{DockerImageBuilder, DockerSpawner, DockerTracker},
    DynImageBuilder, DynSpawner, DynTracker, SpawnSpec,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

const TARGET: &str = "engine::runner";

/// Progress observation scoped to one job run. Implementations receive every
/// status transition and every log line; the runner also appends each line to
/// the job's progress channel.
pub trait JobObserver: Send + Sync {
    fn status(&self, job_id: &str, status: JobStatus, notebook: &str);
    fn log(&self, status: JobStatus, line: &str);
}

pub struct NoopObserver;

impl JobObserver for NoopObserver {
    fn status(&self, _job_id: &str, _status: JobStatus, _notebook: &str) {}
    fn log(&self, _status: JobStatus, _line: &str) {}
}

// Fans every log line out to the observer, the progress channel and the
// accumulated run log (the authoritative copy committed into the crate).
struct RunSink<'a> {
    observer: &'a dyn JobObserver,
    channel: Arc<ProgressChannel>,
    collected: Mutex<String>,
}

impl RunSink<'_> {
    fn collected(&self) -> String {
        self.collected.lock().expect("run log lock").clone()
    }
}

impl LogSink for RunSink<'_> {
    fn emit(&self, status: JobStatus, line: &str) {
        self.observer.log(status, line);
        self.channel.push(ProgressEvent {
            status,
            line: line.to_string(),
        });
        let mut collected = self.collected.lock().expect("run log lock");
        collected.push_str(line);
        collected.push('\n');
    }
}

/// In-container invocation: the runner inside the image writes a uniquely
/// named crate document to the mounted staging folder.
fn container_command(
    job_id: &str,
    notebook: &str,
    provider: &str,
    staging_folder: &str,
) -> Vec<String> {
    vec![
        "env".into(),
        "RUN_CRATE_METADATA=~/.run-crate-metadata.json".into(),
        format!("RUN_CRATE_ID={}", job_id),
        "run-crate".into(),
        notebook.to_string(),
        format!("/mnt/rdm/{}/{}/{}.json", provider, staging_folder, job_id),
    ]
}

pub struct Runner {
    builder: DynImageBuilder,
    spawner: DynSpawner,
    tracker: DynTracker,
    registry: Arc<ProgressRegistry>,
    rdm: Option<Arc<dyn RdmApi>>,
    use_snapshot: bool,
}

impl Runner {
    pub fn new(builder: DynImageBuilder, spawner: DynSpawner, tracker: DynTracker) -> Self {
        Self {
            builder,
            spawner,
            tracker,
            registry: Arc::new(ProgressRegistry::new()),
            rdm: None,
            use_snapshot: false,
        }
    }

    /// Default strategy set backed by the local docker binary.
    pub fn with_docker_defaults() -> Self {
        Self::new(
            Arc::new(DockerImageBuilder::default()),
            Arc::new(DockerSpawner),
            Arc::new(DockerTracker),
        )
    }

    pub fn with_use_snapshot(mut self, use_snapshot: bool) -> Self {
        self.use_snapshot = use_snapshot;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ProgressRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Overrides the store access built from the session, for scripted runs.
    pub fn with_rdm_client(mut self, client: Arc<dyn RdmApi>) -> Self {
        self.rdm = Some(client);
        self
    }

    pub fn registry(&self) -> Arc<ProgressRegistry> {
        self.registry.clone()
    }

    /// Runs one job to a terminal state. Callable once per job id; callers
    /// wanting a retry submit a new job. Every failure anywhere in the
    /// pipeline marks the job failed; the spawned container is stopped
    /// whenever it was started.
    pub async fn execute(
        &self,
        job: &Job,
        session: &RdmSession,
        observer: &dyn JobObserver,
    ) -> Result<RunnerResult> {
        info!(target: TARGET, job_id = %job.id, source = %job.source_url, "starting");
        let channel = self.registry.open(&job.id);
        let sink = RunSink {
            observer,
            channel,
            collected: Mutex::new(String::new()),
        };
        let notebook_slot: Mutex<Option<String>> = Mutex::new(None);

        let outcome = self
            .run_pipeline(job, session, &sink, observer, &notebook_slot)
            .await;
        let result = match outcome {
            Ok(result) => {
                sink.emit(
                    result.status,
                    &format!(
                        "Finished: {}/{}.json",
                        session.staging_folder_name(),
                        job.id
                    ),
                );
                observer.status(&job.id, result.status, &result.notebook);
                info!(target: TARGET, job_id = %job.id, status = %result.status, "finished");
                Ok(result)
            }
            Err(err) => {
                error!(target: TARGET, job_id = %job.id, error = ?err, "job failed");
                sink.emit(JobStatus::Failed, &format!("Error: {:#}", err));
                let notebook = notebook_slot
                    .lock()
                    .expect("notebook slot lock")
                    .clone()
                    .unwrap_or_default();
                observer.status(&job.id, JobStatus::Failed, &notebook);
                Err(err)
            }
        };
        self.release_channel(&job.id, &sink.channel);
        result
    }

    // Two channel references are internal (the registry's entry and the
    // run's own sink); anything beyond that is an attached consumer, which
    // owns removal after it drains the terminal event.
    fn release_channel(&self, job_id: &str, channel: &Arc<ProgressChannel>) {
        if Arc::strong_count(channel) <= 2 {
            debug!(target: TARGET, job_id, "no consumer attached, dropping channel");
            self.registry.close(job_id);
        }
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        session: &RdmSession,
        sink: &RunSink<'_>,
        observer: &dyn JobObserver,
        notebook_slot: &Mutex<Option<String>>,
    ) -> Result<RunnerResult> {
        let client: Arc<dyn RdmApi> = match &self.rdm {
            Some(client) => Arc::clone(client),
            None => Arc::new(RdmClient::for_session(session)?),
        };
        let client = &*client;
        let source_url = job.source_url.as_str();

        // Resolve and build.
        let (notebook, repo_url) = locate::resolve_source(client, session, source_url).await?;
        *notebook_slot.lock().expect("notebook slot lock") = Some(notebook.clone());
        observer.status(&job.id, JobStatus::Building, &notebook);

        let mut spec = BuildSpec::new(repo_url);
        let provider_kind = locate::target_provider(session, source_url)?;
        if provider_kind == "rdm" {
            spec.envs
                .insert("RDM_HOSTS_JSON".into(), session.builder_hosts_json()?);
        }
        spec.labels
            .insert("provider".into(), provider_kind.to_string());
        spec.labels.insert(
            "user.rdm_node_id".into(),
            locate::extract_node_id(locate::strip_crate_prefix(source_url))?,
        );
        spec.labels
            .insert("user.rdm_api_url".into(), session.api_url()?.to_string());
        if self.use_snapshot || job.use_snapshot {
            let (_, snapshot_repo) =
                locate::resolve_source(client, session, locate::strip_crate_prefix(source_url))
                    .await?;
            spec.repo_url = snapshot_repo;
        }
        info!(target: TARGET, job_id = %job.id, repo = %spec.repo_url, "building image");
        let image = self.builder.build(&spec, sink).await?;
        info!(target: TARGET, job_id = %job.id, %image, "image built");

        // Spawn and track.
        observer.status(&job.id, JobStatus::Running, &notebook);
        sink.emit(JobStatus::Running, &format!("Running {}...", notebook));
        let rdm_url = locate::strip_crate_prefix(source_url);
        let parent_url = locate::parent_folder_url(session, rdm_url)?;
        debug!(target: TARGET, %parent_url, "parent folder");
        let staging_url = locate::staging_folder(client, session, &parent_url).await?;
        let provider = locate::extract_storage_provider(rdm_url)?;
        debug!(target: TARGET, %provider, "storage provider");

        let spawn_spec = SpawnSpec {
            job_id: job.id.clone(),
            image,
            cmd: container_command(
                &job.id,
                &notebook,
                &provider,
                session.staging_folder_name(),
            ),
            mounts: Vec::new(),
            rdmfs_token: (provider_kind == "rdm")
                .then(|| session.access_token().map(str::to_string))
                .transpose()?,
        };
        sink.emit(
            JobStatus::Running,
            &format!("Waiting for {} to finish...", notebook),
        );
        let exit_code = self.run_container(&spawn_spec, sink).await?;
        debug!(target: TARGET, job_id = %job.id, exit_code, "container exited");
        sink.emit(JobStatus::Running, "Collecting results...");

        // Collect and commit.
        let result_filename = format!("{}.json", job.id);
        let result_file = locate::find_file_by_name(client, &staging_url, &result_filename)
            .await?
            .with_context(|| {
                format!(
                    "cannot find result file {} in {} folder",
                    result_filename,
                    session.staging_folder_name()
                )
            })?;
        let result_url = result_file
            .pointer("/links/download")
            .and_then(Value::as_str)
            .context("result file without download link")?
            .to_string();
        info!(target: TARGET, job_id = %job.id, %result_url, "modifying crate");
        let status = mutate::modify_crate(
            client,
            &job.id,
            &result_url,
            &staging_url,
            &sink.collected(),
        )
        .await?;
        let download_href = mutate::strip_query(&result_url).to_string();
        let entry = RunCrateIndexEntry {
            notebook: notebook.clone(),
            id: job.id.clone(),
            created_at: job.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            updated_at: job.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            name: result_filename,
            status,
            links: vec![
                IndexLink {
                    rel: "download".into(),
                    href: download_href.clone(),
                },
                IndexLink {
                    rel: "web".into(),
                    href: locate::web_url_from_files(session, &download_href)?,
                },
            ],
        };
        mutate::insert_index(client, &staging_url, &entry).await?;

        Ok(RunnerResult {
            notebook,
            result_url,
            status,
        })
    }

    // Scoped acquisition: stop() is guaranteed once start() succeeded, on
    // both the success and the failure path.
    async fn run_container(&self, spec: &SpawnSpec, sink: &dyn LogSink) -> Result<i64> {
        let handle = self.spawner.start(spec).await?;
        info!(target: TARGET, container = %handle.name, host = %handle.host, port = handle.port, "container started");
        let outcome = async {
            let mut process = self.tracker.track(&handle).await?;
            process.wait(sink).await
        }
        .await;
        let stopped = self.spawner.stop(&handle).await;
        let exit_code = outcome?;
        stopped?;
        Ok(exit_code)
    }
}
