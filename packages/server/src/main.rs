//! `thumbnailer`: runs the thumbnail pipeline.
//!
//! Files given on the command line are ingested and submitted as jobs. With
//! `--exit-when-idle` the process stops once those jobs are finished;
//! otherwise it keeps consuming until Ctrl-C.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actors::{PipelineDeps, ResizeGenerator, content_type_for, start_pipeline};
use bytes::Bytes;
use clap::Parser;
use db::repositories::JobRepository;
use storage::Storage;
use thumbnailer_core::{JobId, JobStatus};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "thumbnailer", version, about = "Asynchronous thumbnail generation")]
struct Args {
    /// Image files to ingest and submit
    files: Vec<PathBuf>,

    /// Number of workers (overrides THUMBNAILER_CONCURRENCY)
    #[arg(short, long)]
    concurrency: Option<u32>,

    /// Exit once the submitted jobs are finished
    #[arg(long)]
    exit_when_idle: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(concurrency) = args.concurrency.filter(|n| *n > 0) {
        config.pipeline.concurrency = concurrency;
    }

    tracing::info!("Initializing thumbnail pipeline...");

    let db = db::init(&config.db).await?;
    let storage = Storage::new(config.storage.clone()).await?;
    let deps = PipelineDeps::stored(db.clone(), storage, Arc::new(ResizeGenerator));
    let pipeline = start_pipeline(deps, config.pipeline.clone()).await?;

    let mut submitted = Vec::new();
    for path in &args.files {
        let payload = match tokio::fs::read(path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");

        let image = pipeline
            .ingest()
            .store(name, content_type_for(path), payload)
            .await?;
        let job = pipeline.producer().submit_thumbnail_job(&image).await?;
        submitted.push(job.id);
    }

    let jobs = JobRepository::new(db);
    if args.exit_when_idle {
        tokio::select! {
            result = wait_for_jobs(&jobs, &submitted) => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
        }
    } else {
        tracing::info!("Pipeline running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    pipeline.shutdown().await;

    for id in &submitted {
        let job = jobs.get(*id).await?;
        match job.status {
            JobStatus::Complete => tracing::info!(job_id = %job.id, "complete"),
            status => tracing::info!(
                job_id = %job.id,
                "{}: {}",
                status,
                job.error.as_deref().unwrap_or("-")
            ),
        }
    }

    Ok(())
}

async fn wait_for_jobs(jobs: &JobRepository, ids: &[JobId]) -> Result<(), db::DbError> {
    let mut remaining: Vec<JobId> = ids.to_vec();
    while !remaining.is_empty() {
        let mut still_running = Vec::with_capacity(remaining.len());
        for id in remaining {
            if !jobs.get(id).await?.status.is_terminal() {
                still_running.push(id);
            }
        }
        remaining = still_running;
        if !remaining.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    Ok(())
}
