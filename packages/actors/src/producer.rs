//! Job submission.

use db::repositories::JobRepository;
use thumbnailer_core::{Image, Job, JobMessage};

use crate::broker::BrokerClient;
use crate::error::PipelineError;

/// Creates thumbnail jobs and schedules them on the broker.
#[derive(Clone)]
pub struct Producer {
    jobs: JobRepository,
    broker: BrokerClient,
}

impl Producer {
    pub fn new(jobs: JobRepository, broker: BrokerClient) -> Self {
        Self { jobs, broker }
    }

    /// Create a pending job for `image` and enqueue it.
    ///
    /// Not atomic: if the enqueue fails the job stays `Pending` and the error
    /// is returned. The supervisor's sweep re-enqueues such jobs later.
    pub async fn submit_thumbnail_job(&self, image: &Image) -> Result<Job, PipelineError> {
        let job = self.jobs.create(image.id).await?;

        if let Err(e) = self.broker.enqueue(JobMessage::new(job.id)).await {
            tracing::warn!(job_id = %job.id, "Failed to enqueue job: {}", e);
            return Err(e.into());
        }

        tracing::info!(job_id = %job.id, image_id = %image.id, "Submitted thumbnail job");
        Ok(job)
    }
}
