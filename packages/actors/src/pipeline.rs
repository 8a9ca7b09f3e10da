//! The thumbnail job handler run by workers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use db::repositories::{JobRepository, ThumbnailRepository};
use storage::{Storage, thumbnail_key};
use thumbnailer_core::{
    Delivery, Image, Job, JobId, JobStatus, PipelineConfig, Thumbnail, ThumbnailId,
    ThumbnailResult, ThumbnailSize, thumbnail_filename,
};

use crate::collaborators::{ImageStore, ThumbnailGenerator};
use crate::error::PipelineError;
use crate::handler::{HandlerFuture, MessageHandler};

struct PipelineInner {
    jobs: JobRepository,
    thumbnails: ThumbnailRepository,
    images: Arc<dyn ImageStore>,
    generator: Arc<dyn ThumbnailGenerator>,
    storage: Storage,
    size: ThumbnailSize,
    suffix: String,
    timeout: Option<Duration>,
}

/// Drives one job from `Pending` to a terminal state per delivery.
#[derive(Clone)]
pub struct ThumbnailPipeline {
    inner: Arc<PipelineInner>,
}

impl ThumbnailPipeline {
    pub fn new(
        jobs: JobRepository,
        thumbnails: ThumbnailRepository,
        images: Arc<dyn ImageStore>,
        generator: Arc<dyn ThumbnailGenerator>,
        storage: Storage,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                jobs,
                thumbnails,
                images,
                generator,
                storage,
                size: config.thumbnail_size(),
                suffix: config.filename_suffix.clone(),
                timeout: config.generate_timeout(),
            }),
        }
    }

    /// Process one delivery. On error the job is marked failed unless it
    /// is already terminal or owned by another delivery.
    pub async fn process(&self, delivery: &Delivery) -> Result<ThumbnailResult, PipelineError> {
        let job_id = delivery.message.job_id;

        match self.run(delivery).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if !err.leaves_job_untouched() {
                    self.record_failure(job_id, &err).await;
                }
                Err(err)
            }
        }
    }

    async fn run(&self, delivery: &Delivery) -> Result<ThumbnailResult, PipelineError> {
        let inner = &self.inner;
        let job_id = delivery.message.job_id;
        let job = inner.jobs.get(job_id).await?;

        match job.status {
            JobStatus::Complete => {
                tracing::info!(job_id = %job_id, delivery_id = %delivery.id, "Job already complete, skipping duplicate");
                return self.existing_result(&job).await;
            }
            JobStatus::Failure => {
                return Err(PipelineError::AlreadyFinished {
                    job_id,
                    status: job.status,
                });
            }
            JobStatus::Processing if !delivery.redelivered => {
                return Err(PipelineError::AlreadyClaimed(job_id));
            }
            JobStatus::Processing => {
                tracing::info!(job_id = %job_id, delivery_id = %delivery.id, "Resuming interrupted job");
            }
            JobStatus::Pending => {
                inner
                    .jobs
                    .set_status(job_id, JobStatus::Processing, None)
                    .await
                    .map_err(|e| match PipelineError::from(e) {
                        PipelineError::InvalidTransition { .. } => {
                            PipelineError::AlreadyClaimed(job_id)
                        }
                        other => other,
                    })?;
            }
        }

        // A thumbnail left by an interrupted attempt only needs the final write.
        if let Some(thumbnail) = inner.thumbnails.get_by_job(job_id).await? {
            inner
                .jobs
                .set_status(job_id, JobStatus::Complete, Some(thumbnail.id))
                .await?;
            return Ok(ThumbnailResult {
                thumbnail_id: thumbnail.id,
                size: thumbnail.size,
            });
        }

        let image = inner.images.get_image(job.image_id).await?;
        let payload = inner.images.read_payload(&image).await?;
        let generated = self.generate(payload, &image.content_type).await?;
        let thumbnail = self.store_thumbnail(&job, &image, generated).await?;

        if let Err(e) = inner
            .jobs
            .set_status(job_id, JobStatus::Complete, Some(thumbnail.id))
            .await
        {
            self.discard(&thumbnail).await;
            return Err(e.into());
        }

        tracing::info!(
            job_id = %job_id,
            thumbnail_id = %thumbnail.id,
            size = thumbnail.size,
            "Thumbnail created"
        );

        Ok(ThumbnailResult {
            thumbnail_id: thumbnail.id,
            size: thumbnail.size,
        })
    }

    async fn existing_result(&self, job: &Job) -> Result<ThumbnailResult, PipelineError> {
        let thumbnail_id = job
            .thumbnail_id
            .ok_or_else(|| PipelineError::NotFound(format!("Thumbnail for job {}", job.id)))?;
        let thumbnail = self.inner.thumbnails.get(thumbnail_id).await?;
        Ok(ThumbnailResult {
            thumbnail_id,
            size: thumbnail.size,
        })
    }

    async fn generate(&self, payload: Bytes, content_type: &str) -> Result<Bytes, PipelineError> {
        let inner = &self.inner;
        let generation = inner.generator.generate(payload, content_type, inner.size);

        match inner.timeout {
            Some(limit) => tokio::time::timeout(limit, generation)
                .await
                .map_err(|_| PipelineError::Timeout(limit))?
                .map_err(PipelineError::from),
            None => generation.await.map_err(PipelineError::from),
        }
    }

    async fn store_thumbnail(
        &self,
        job: &Job,
        image: &Image,
        payload: Bytes,
    ) -> Result<Thumbnail, PipelineError> {
        let inner = &self.inner;
        let filename = thumbnail_filename(&image.filename, &inner.suffix);
        let storage_key = thumbnail_key(job.id, &filename);

        let thumbnail = Thumbnail {
            id: ThumbnailId::new(),
            job_id: job.id,
            image_id: image.id,
            filename,
            content_type: image.content_type.clone(),
            size: payload.len() as u64,
            storage_key,
            created_at: Utc::now(),
        };

        inner.storage.put(&thumbnail.storage_key, payload).await?;

        if let Err(e) = inner.thumbnails.create(&thumbnail).await {
            if let Err(cleanup) = inner.storage.delete(&thumbnail.storage_key).await {
                tracing::warn!(job_id = %job.id, "Failed to remove thumbnail payload: {}", cleanup);
            }
            return Err(e.into());
        }

        Ok(thumbnail)
    }

    /// Remove a thumbnail created by this attempt.
    async fn discard(&self, thumbnail: &Thumbnail) {
        let inner = &self.inner;
        if let Err(e) = inner.thumbnails.delete(thumbnail.id).await {
            tracing::warn!(thumbnail_id = %thumbnail.id, "Failed to remove thumbnail record: {}", e);
        }
        if let Err(e) = inner.storage.delete(&thumbnail.storage_key).await {
            tracing::warn!(thumbnail_id = %thumbnail.id, "Failed to remove thumbnail payload: {}", e);
        }
    }

    async fn record_failure(&self, job_id: JobId, err: &PipelineError) {
        tracing::warn!(job_id = %job_id, "Job failed: {}", err);

        match self.inner.jobs.fail(job_id, err.to_string()).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(job_id = %job_id, "No job record to mark failed");
            }
            Err(db::DbError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::debug!(job_id = %job_id, "Job already {}", from);
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Failed to record job failure: {}", e);
            }
        }
    }
}

impl MessageHandler for ThumbnailPipeline {
    fn handle(&self, delivery: &Delivery) -> HandlerFuture {
        let pipeline = self.clone();
        let delivery = delivery.clone();
        Box::pin(async move {
            pipeline
                .process(&delivery)
                .await
                .map(Some)
                .map_err(|e| e.to_string())
        })
    }
}
