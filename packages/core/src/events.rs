//! Broker messages and terminal-outcome notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, ThumbnailId};

/// Message carried by the broker. Only references the job; workers
/// re-read everything else from the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
}

impl JobMessage {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

/// Sequence number assigned by the broker on enqueue.
///
/// Strictly increasing, so it doubles as the FIFO ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub u64);

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A message handed to a consumer, awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub message: JobMessage,
    /// Set when the message was reloaded from the durable log after a restart.
    #[serde(default)]
    pub redelivered: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// Successful outcome of a thumbnail job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailResult {
    pub thumbnail_id: ThumbnailId,
    /// Generated payload length in bytes.
    pub size: u64,
}

/// Terminal notifications published after a delivery is acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// The handler reported success.
    Completed {
        delivery_id: DeliveryId,
        job_id: JobId,
        result: Option<ThumbnailResult>,
        timestamp: DateTime<Utc>,
    },
    /// The handler reported failure. The message is not retried.
    Failed {
        delivery_id: DeliveryId,
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl BrokerEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            BrokerEvent::Completed { job_id, .. } | BrokerEvent::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn delivery_id(&self) -> DeliveryId {
        match self {
            BrokerEvent::Completed { delivery_id, .. }
            | BrokerEvent::Failed { delivery_id, .. } => *delivery_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BrokerEvent::Completed { timestamp, .. } | BrokerEvent::Failed { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            BrokerEvent::Completed {
                job_id,
                result: Some(result),
                ..
            } => format!("Job {} completed with thumbnail {}", job_id, result.thumbnail_id),
            BrokerEvent::Completed { job_id, .. } => format!("Job {} completed without result", job_id),
            BrokerEvent::Failed { job_id, error, .. } => format!("Job {} failed: {}", job_id, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_only_the_job_id() -> Result<(), serde_json::Error> {
        let job_id = JobId::new();
        let json = serde_json::to_value(JobMessage::new(job_id))?;
        assert_eq!(json, serde_json::json!({ "job_id": job_id.to_string() }));
        Ok(())
    }

    #[test]
    fn events_are_tagged() -> Result<(), serde_json::Error> {
        let event = BrokerEvent::Failed {
            delivery_id: DeliveryId(7),
            job_id: JobId::new(),
            error: "boom".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["event"], "failed");
        assert_eq!(json["delivery_id"], 7);
        assert_eq!(event.delivery_id(), DeliveryId(7));
        Ok(())
    }
}
