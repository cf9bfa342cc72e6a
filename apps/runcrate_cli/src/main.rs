use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use runcrate_engine::{NoopObserver, Runner};
use runcrate_model::{Job, JobStatus};
use runcrate_rdm::{locate, RdmClient, RdmConfig, RdmSession, RdmToken};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runcrate", about = "Reproducible notebook runs against an RDM file store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, run and commit one job for the given source reference
    Run {
        /// Web URL of a notebook, or a crate+ reference to a crate document
        source_url: String,
        #[arg(long, env = "RUNCRATE_RDM_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Service the token was issued for; defaults to the configured one
        #[arg(long)]
        service_id: Option<String>,
        /// Re-resolve the source right before the build instead of reusing
        /// the initial resolution
        #[arg(long, default_value_t = false)]
        use_snapshot: bool,
        /// Fixed job id instead of a generated one
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Resolve a source reference and print the notebook and repository
    Resolve {
        source_url: String,
        #[arg(long, env = "RUNCRATE_RDM_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[arg(long)]
        service_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source_url,
            token,
            service_id,
            use_snapshot,
            job_id,
        } => run(source_url, token, service_id, use_snapshot, job_id).await?,
        Commands::Resolve {
            source_url,
            token,
            service_id,
        } => resolve(source_url, token, service_id).await?,
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();
}

fn session(token: Option<String>, service_id: Option<String>) -> RdmSession {
    let config = RdmConfig::from_env();
    let token = token.map(|token| RdmToken {
        service_id: service_id.unwrap_or_else(|| config.service_id.clone()),
        token,
    });
    RdmSession::new(config, token)
}

async fn run(
    source_url: String,
    token: Option<String>,
    service_id: Option<String>,
    use_snapshot: bool,
    job_id: Option<String>,
) -> Result<()> {
    let session = session(token, service_id);
    let mut job = Job::new(source_url);
    if let Some(id) = job_id {
        job = job.with_id(id);
    }
    job.use_snapshot = use_snapshot;
    info!(job_id = %job.id, "submitting job");

    let runner = Arc::new(Runner::with_docker_defaults().with_use_snapshot(use_snapshot));
    let channel = runner.registry().open(&job.id);
    let execution = {
        let runner = runner.clone();
        let job = job.clone();
        let session = session.clone();
        tokio::spawn(async move { runner.execute(&job, &session, &NoopObserver).await })
    };

    loop {
        let event = channel.pop().await;
        println!("[{}] {}", event.status, event.line);
        if event.status.is_terminal() {
            break;
        }
    }
    runner.registry().close(&job.id);

    let result = execution.await.context("job task panicked")??;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "job_id": job.id,
            "notebook": result.notebook,
            "status": result.status,
            "result_url": result.result_url,
        }))?
    );
    if result.status == JobStatus::Failed {
        bail!("job {} failed", job.id);
    }
    Ok(())
}

async fn resolve(
    source_url: String,
    token: Option<String>,
    service_id: Option<String>,
) -> Result<()> {
    let session = session(token, service_id);
    let client = RdmClient::for_session(&session)?;
    let (notebook, repo_url) = locate::resolve_source(&client, &session, &source_url).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "notebook": notebook,
            "repository": repo_url,
            "provider": locate::extract_storage_provider(locate::strip_crate_prefix(&source_url))?,
            "node_id": locate::extract_node_id(locate::strip_crate_prefix(&source_url))?,
        }))?
    );
    Ok(())
}
