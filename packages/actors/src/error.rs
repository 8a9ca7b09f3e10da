//! Error types for the broker and the thumbnail pipeline.

use std::time::Duration;

use db::DbError;
use storage::StorageError;
use thumbnailer_core::{DeliveryId, JobId, JobStatus};

/// Errors returned by the message broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("A consumer is already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("Not subscribed")]
    NotSubscribed,

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(DeliveryId),

    #[error("Broker log error: {0}")]
    Persistence(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for BrokerError {
    fn from(err: DbError) -> Self {
        BrokerError::Persistence(err.to_string())
    }
}

/// Errors raised while processing a thumbnail job.
///
/// They are contained by the handler: the job ends `Failure` and the
/// message is acknowledged as failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Thumbnail generation failed: {0}")]
    Generation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Thumbnail generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job {job_id} already finished as {status}")]
    AlreadyFinished { job_id: JobId, status: JobStatus },

    #[error("Job {0} is being processed by another delivery")]
    AlreadyClaimed(JobId),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl PipelineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound(_))
    }

    /// Whether this error must leave the job record untouched.
    pub(crate) fn leaves_job_untouched(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyFinished { .. } | PipelineError::AlreadyClaimed(_)
        )
    }
}

impl From<DbError> for PipelineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => PipelineError::NotFound(what),
            DbError::InvalidTransition { job_id, from, to } => {
                PipelineError::InvalidTransition { job_id, from, to }
            }
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => PipelineError::NotFound(format!("Blob not found: {key}")),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_keep_not_found_and_transitions() {
        let err: PipelineError = DbError::NotFound("Job not found: x".into()).into();
        assert!(err.is_not_found());

        let job_id = JobId::new();
        let err: PipelineError = DbError::InvalidTransition {
            job_id,
            from: JobStatus::Failure,
            to: JobStatus::Processing,
        }
        .into();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition { from: JobStatus::Failure, .. }
        ));

        let err: PipelineError = DbError::Query("syntax".into()).into();
        assert!(matches!(err, PipelineError::Persistence(_)));
    }

    #[test]
    fn storage_not_found_is_not_found() {
        let err: PipelineError = StorageError::NotFound("images/a/b.png".into()).into();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("images/a/b.png"));
    }

    #[test]
    fn guard_errors_leave_the_job_alone() {
        let job_id = JobId::new();
        assert!(PipelineError::AlreadyClaimed(job_id).leaves_job_untouched());
        assert!(!PipelineError::Generation("bad header".into()).leaves_job_untouched());
    }
}
