//! Job domain types for thumbnail derivation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImageId, JobId, ThumbnailId};

/// Current status of a job in its lifecycle.
///
/// Jobs only ever move forward: `Pending -> Processing -> {Complete, Failure}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting to be picked up by a worker.
    #[default]
    Pending,
    /// Job is currently being processed by a worker.
    Processing,
    /// Thumbnail was derived and linked to the job.
    Complete,
    /// Job ended without a thumbnail.
    Failure,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failure)
    }

    /// Position in the lifecycle; both terminal states share the last rank.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Complete | JobStatus::Failure => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle ordering.
    ///
    /// `Pending -> Failure` is allowed so a job whose message can no longer be
    /// processed can still be finalized.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job tracks one thumbnail derivation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Source image. Never changes after creation.
    pub image_id: ImageId,
    /// Derived thumbnail, present only when the job is complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_id: Option<ThumbnailId>,
    /// Current status.
    pub status: JobStatus,
    /// Failure reason, present only when the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for an image.
    pub fn new(image_id: ImageId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            image_id,
            thumbnail_id: None,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the `thumbnail_id` iff `Complete` invariant.
    pub fn is_consistent(&self) -> bool {
        self.thumbnail_id.is_some() == (self.status == JobStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Complete,
        JobStatus::Failure,
    ];

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failure));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failure));
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [JobStatus::Complete, JobStatus::Failure] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn no_backward_or_self_transitions() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
            assert!(!status.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn new_job_is_pending_and_consistent() {
        let job = Job::new(ImageId::new());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.thumbnail_id.is_none());
        assert!(job.is_consistent());
    }

    #[test]
    fn status_serializes_as_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&JobStatus::Processing)?, "\"processing\"");
        let parsed: JobStatus = serde_json::from_str("\"failure\"")?;
        assert_eq!(parsed, JobStatus::Failure);
        Ok(())
    }
}
