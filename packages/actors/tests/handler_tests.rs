#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;

use actors::{
    GenerateFuture, GenerationError, ImageIngest, PipelineError, StoredImageStore,
    ThumbnailGenerator, ThumbnailPipeline,
};
use bytes::Bytes;
use chrono::Utc;
use db::Database;
use db::repositories::{ImageRepository, JobRepository, ThumbnailRepository};
use storage::{Storage, thumbnail_key};
use thumbnailer_core::{
    Delivery, DeliveryId, Image, Job, JobMessage, JobStatus, Thumbnail, ThumbnailId,
    ThumbnailSize, thumbnail_filename,
};

use common::{ScriptedGenerator, TestResult, rendition, test_config};

/// Something another writer does while the thumbnail is being generated.
#[derive(Clone)]
enum Interference {
    FailJob(JobRepository, thumbnailer_core::JobId),
    SeedThumbnail(ThumbnailRepository, Thumbnail),
}

struct InterferingGenerator {
    interference: Interference,
}

impl ThumbnailGenerator for InterferingGenerator {
    fn generate(&self, payload: Bytes, _content_type: &str, size: ThumbnailSize) -> GenerateFuture {
        let interference = self.interference.clone();
        Box::pin(async move {
            let outcome = match interference {
                Interference::FailJob(jobs, job_id) => jobs
                    .fail(job_id, "cancelled by operator")
                    .await
                    .map(|_| ()),
                Interference::SeedThumbnail(thumbnails, thumbnail) => {
                    thumbnails.create(&thumbnail).await.map(|_| ())
                }
            };
            match outcome {
                Ok(()) => Ok(rendition(&payload, size)),
                Err(e) => Err(GenerationError(e.to_string())),
            }
        })
    }
}

struct Rig {
    db: Database,
    storage: Storage,
    jobs: JobRepository,
    thumbnails: ThumbnailRepository,
    image: Image,
    job: Job,
}

impl Rig {
    async fn new() -> TestResult<Self> {
        let db = common::setup_db().await?;
        let storage = common::setup_storage().await?;
        let ingest = ImageIngest::new(ImageRepository::new(db.clone()), storage.clone());
        let image = ingest
            .store("Beach.png", "image/png", Bytes::from_static(b"beach-pixels"))
            .await?;
        let jobs = JobRepository::new(db.clone());
        let job = jobs.create(image.id).await?;

        Ok(Self {
            thumbnails: ThumbnailRepository::new(db.clone()),
            db,
            storage,
            jobs,
            image,
            job,
        })
    }

    fn pipeline(&self, generator: Arc<dyn ThumbnailGenerator>) -> ThumbnailPipeline {
        let images = StoredImageStore::new(ImageRepository::new(self.db.clone()), self.storage.clone());
        ThumbnailPipeline::new(
            self.jobs.clone(),
            self.thumbnails.clone(),
            Arc::new(images),
            generator,
            self.storage.clone(),
            &test_config(),
        )
    }

    fn delivery(&self, redelivered: bool) -> Delivery {
        Delivery {
            id: DeliveryId(1),
            message: JobMessage::new(self.job.id),
            redelivered,
            enqueued_at: Utc::now(),
        }
    }

    /// Where the pipeline puts this job's thumbnail payload.
    fn thumbnail_key(&self) -> String {
        thumbnail_key(self.job.id, &thumbnail_filename(&self.image.filename, "_thumb"))
    }
}

#[tokio::test]
async fn lost_completion_write_discards_stored_thumbnail() -> TestResult {
    let rig = Rig::new().await?;
    let generator = InterferingGenerator {
        interference: Interference::FailJob(rig.jobs.clone(), rig.job.id),
    };
    let pipeline = rig.pipeline(Arc::new(generator));

    let result = pipeline.process(&rig.delivery(false)).await;
    assert!(matches!(
        result,
        Err(PipelineError::InvalidTransition {
            from: JobStatus::Failure,
            to: JobStatus::Complete,
            ..
        })
    ));

    // The other writer's failure stands and nothing from this attempt remains.
    let job = rig.jobs.get(rig.job.id).await?;
    assert_eq!(job.status, JobStatus::Failure);
    assert_eq!(job.error.as_deref(), Some("cancelled by operator"));
    assert!(rig.thumbnails.get_by_job(rig.job.id).await?.is_none());
    assert!(!rig.storage.exists(&rig.thumbnail_key()).await?);

    Ok(())
}

#[tokio::test]
async fn rejected_thumbnail_record_removes_payload() -> TestResult {
    let rig = Rig::new().await?;
    let seeded = Thumbnail {
        id: ThumbnailId::new(),
        job_id: rig.job.id,
        image_id: rig.image.id,
        filename: "other_thumb.png".into(),
        content_type: "image/png".into(),
        size: 3,
        storage_key: "thumbnails/elsewhere/other_thumb.png".into(),
        created_at: Utc::now(),
    };
    let generator = InterferingGenerator {
        interference: Interference::SeedThumbnail(rig.thumbnails.clone(), seeded.clone()),
    };
    let pipeline = rig.pipeline(Arc::new(generator));

    let result = pipeline.process(&rig.delivery(false)).await;
    assert!(matches!(result, Err(PipelineError::Persistence(_))));

    let job = rig.jobs.get(rig.job.id).await?;
    assert_eq!(job.status, JobStatus::Failure);
    assert!(job.thumbnail_id.is_none());
    assert!(job.error.is_some());

    // Only the competing record is left, and the payload written for it is gone.
    assert_eq!(rig.thumbnails.get_by_job(rig.job.id).await?, Some(seeded));
    assert_eq!(rig.thumbnails.count_for_image(rig.image.id).await?, 1);
    assert!(!rig.storage.exists(&rig.thumbnail_key()).await?);

    Ok(())
}

#[tokio::test]
async fn claimed_job_is_left_to_its_owner() -> TestResult {
    let rig = Rig::new().await?;
    let claimed = rig
        .jobs
        .set_status(rig.job.id, JobStatus::Processing, None)
        .await?;
    let generator = Arc::new(ScriptedGenerator::default());
    let pipeline = rig.pipeline(generator.clone());

    let result = pipeline.process(&rig.delivery(false)).await;
    assert!(matches!(result, Err(PipelineError::AlreadyClaimed(id)) if id == rig.job.id));

    let job = rig.jobs.get(rig.job.id).await?;
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.error.is_none());
    assert_eq!(job.updated_at, claimed.updated_at);
    assert!(generator.calls().is_empty());
    assert!(rig.thumbnails.get_by_job(rig.job.id).await?.is_none());

    Ok(())
}
