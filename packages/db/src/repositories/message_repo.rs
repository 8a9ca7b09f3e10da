//! Durable log backing the message broker.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thumbnailer_core::{DeliveryId, JobId, JobMessage};

use crate::{Database, DbError};

/// Repository for unacknowledged broker messages.
#[derive(Clone)]
pub struct MessageRepository {
    db: Database,
}

/// A message as persisted in the broker log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub seq: u64,
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn delivery_id(&self) -> DeliveryId {
        DeliveryId(self.seq)
    }

    pub fn message(&self) -> JobMessage {
        JobMessage::new(self.job_id)
    }
}

/// Zero-padded so record keys sort the same way as sequence numbers.
fn record_key(seq: u64) -> String {
    format!("{seq:020}")
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message under its sequence number.
    pub async fn append(&self, seq: u64, message: &JobMessage) -> Result<StoredMessage, DbError> {
        let stored = StoredMessage {
            seq,
            job_id: message.job_id,
            enqueued_at: Utc::now(),
        };

        let record: Option<StoredMessage> = self
            .db
            .create(("broker_message", record_key(seq)))
            .content(stored)
            .await?;

        record.ok_or_else(|| DbError::Query(format!("Failed to append message {}", seq)))
    }

    /// Remove an acknowledged message.
    pub async fn remove(&self, seq: u64) -> Result<(), DbError> {
        let _: Option<StoredMessage> = self
            .db
            .delete(("broker_message", record_key(seq)))
            .await?;
        Ok(())
    }

    /// All unacknowledged messages in enqueue order.
    pub async fn list(&self) -> Result<Vec<StoredMessage>, DbError> {
        let mut result = self
            .db
            .query("SELECT seq, job_id, enqueued_at FROM broker_message ORDER BY seq ASC")
            .await?;

        Ok(result.take(0)?)
    }

    /// Highest sequence number still in the log.
    pub async fn max_seq(&self) -> Result<Option<u64>, DbError> {
        Ok(self.list().await?.last().map(|m| m.seq))
    }

    /// Jobs that currently have a message in the log.
    pub async fn job_ids(&self) -> Result<HashSet<JobId>, DbError> {
        Ok(self.list().await?.into_iter().map(|m| m.job_id).collect())
    }
}
