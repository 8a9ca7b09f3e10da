#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    GenerateFuture, GenerationError, ImageIngest, Pipeline, PipelineDeps, ThumbnailGenerator,
    start_pipeline,
};
use bytes::Bytes;
use db::repositories::{ImageRepository, JobRepository, ThumbnailRepository};
use db::{Database, DbConfig};
use storage::{Storage, StorageConfig};
use thumbnailer_core::{Job, JobId, PipelineConfig, ThumbnailSize};

pub type TestResult<T = ()> = Result<T, Box<dyn Error>>;

/// Payloads containing this marker make the scripted generator fail.
pub const FAIL_MARKER: &[u8] = b"FAIL";
/// Payloads containing this marker make the scripted generator panic.
pub const PANIC_MARKER: &[u8] = b"PANIC";

pub async fn setup_db() -> Result<Database, db::DbError> {
    db::init(&DbConfig::memory()).await
}

pub async fn setup_storage() -> Result<Storage, storage::StorageError> {
    Storage::new(StorageConfig::memory()).await
}

/// Generator that records the payloads it sees and returns a fixed-size
/// rendition, failing or panicking on marked payloads.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: Mutex<Vec<Bytes>>,
    pub delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> Vec<Bytes> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

pub fn rendition(payload: &[u8], size: ThumbnailSize) -> Bytes {
    let mut out = format!("thumb:{size}:").into_bytes();
    out.extend_from_slice(&payload[..payload.len().min(8)]);
    Bytes::from(out)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

impl ThumbnailGenerator for ScriptedGenerator {
    fn generate(&self, payload: Bytes, _content_type: &str, size: ThumbnailSize) -> GenerateFuture {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(payload.clone());
        }
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if contains(&payload, PANIC_MARKER) {
                panic!("generator blew up");
            }
            if contains(&payload, FAIL_MARKER) {
                return Err(GenerationError("corrupt image data".into()));
            }
            Ok(rendition(&payload, size))
        })
    }
}

pub struct Harness {
    pub db: Database,
    pub storage: Storage,
    pub pipeline: Pipeline,
    pub generator: Arc<ScriptedGenerator>,
    pub jobs: JobRepository,
    pub thumbnails: ThumbnailRepository,
    pub ingest: ImageIngest,
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig::default().with_poll_interval_ms(10)
}

impl Harness {
    pub async fn start() -> TestResult<Self> {
        Self::start_with(test_config(), ScriptedGenerator::default()).await
    }

    pub async fn start_with(config: PipelineConfig, generator: ScriptedGenerator) -> TestResult<Self> {
        let db = setup_db().await?;
        let storage = setup_storage().await?;
        Self::start_on(db, storage, config, generator).await
    }

    pub async fn start_on(
        db: Database,
        storage: Storage,
        config: PipelineConfig,
        generator: ScriptedGenerator,
    ) -> TestResult<Self> {
        let generator = Arc::new(generator);
        let deps = PipelineDeps::stored(db.clone(), storage.clone(), generator.clone());
        let pipeline = start_pipeline(deps, config).await?;

        Ok(Self {
            jobs: JobRepository::new(db.clone()),
            thumbnails: ThumbnailRepository::new(db.clone()),
            ingest: ImageIngest::new(ImageRepository::new(db.clone()), storage.clone()),
            db,
            storage,
            pipeline,
            generator,
        })
    }

    /// Poll until every job is terminal.
    pub async fn wait_terminal(&self, ids: &[JobId]) -> TestResult<Vec<Job>> {
        wait_terminal(&self.jobs, ids).await
    }
}

pub async fn wait_terminal(jobs: &JobRepository, ids: &[JobId]) -> TestResult<Vec<Job>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = Vec::with_capacity(ids.len());
        for id in ids {
            let job = jobs.get(*id).await?;
            if job.status.is_terminal() {
                done.push(job);
            }
        }
        if done.len() == ids.len() {
            return Ok(done);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(format!("jobs not terminal in time: {} of {}", done.len(), ids.len()).into());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
