//! Job repository: the persisted job state machine.

use std::collections::HashMap;

use chrono::serde::ts_microseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use thumbnailer_core::{ImageId, Job, JobId, JobStatus, ThumbnailId};

use crate::{Database, DbError, parse_record_id};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    id: Thing,
    image_id: ImageId,
    thumbnail_id: Option<ThumbnailId>,
    status: JobStatus,
    error: Option<String>,
    #[serde(with = "ts_microseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_microseconds")]
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        Ok(Job {
            id: parse_record_id(&self.id, JobId::parse)?,
            image_id: self.image_id,
            thumbnail_id: self.thumbnail_id,
            status: self.status,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Struct for creating jobs - the record id carries the job id.
#[derive(Debug, Clone, Serialize)]
struct JobCreate {
    image_id: ImageId,
    status: JobStatus,
    #[serde(with = "ts_microseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "ts_microseconds")]
    updated_at: DateTime<Utc>,
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub image_id: Option<ImageId>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new pending job for an image.
    pub async fn create(&self, image_id: ImageId) -> Result<Job, DbError> {
        let job = Job::new(image_id);
        let create_data = JobCreate {
            image_id: job.image_id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        };

        let record: Option<JobRecord> = self
            .db
            .create(("job", job.id.to_string()))
            .content(create_data)
            .await?;

        let created = record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()?;

        tracing::debug!(job_id = %created.id, image_id = %image_id, "Created job");
        Ok(created)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Move a job to `status`.
    ///
    /// `thumbnail_id` must be present exactly when `status` is
    /// [`JobStatus::Complete`]. Illegal transitions fail with
    /// [`DbError::InvalidTransition`].
    pub async fn set_status(
        &self,
        id: JobId,
        status: JobStatus,
        thumbnail_id: Option<ThumbnailId>,
    ) -> Result<Job, DbError> {
        self.transition(id, status, thumbnail_id, None).await
    }

    /// Mark a job as failed, recording the reason.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<Job, DbError> {
        self.transition(id, JobStatus::Failure, None, Some(error.into()))
            .await
    }

    async fn transition(
        &self,
        id: JobId,
        status: JobStatus,
        thumbnail_id: Option<ThumbnailId>,
        error: Option<String>,
    ) -> Result<Job, DbError> {
        let current = self.get(id).await?;

        let invalid = |from: JobStatus| DbError::InvalidTransition {
            job_id: id,
            from,
            to: status,
        };

        if !current.status.can_transition_to(status)
            || thumbnail_id.is_some() != (status == JobStatus::Complete)
        {
            return Err(invalid(current.status));
        }

        // Compare-and-set on the status we validated against.
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET status = $status,
                    thumbnail_id = $thumbnail_id,
                    error = $error,
                    updated_at = $updated_at
                WHERE status = $expected
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .bind(("thumbnail_id", thumbnail_id.map(|t| t.to_string())))
            .bind(("error", error))
            .bind(("updated_at", Utc::now().timestamp_micros()))
            .bind(("expected", current.status))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        match records.into_iter().next() {
            Some(record) => {
                let job = record.into_job()?;
                tracing::debug!(job_id = %id, from = %current.status, to = %status, "Job transitioned");
                Ok(job)
            }
            None => {
                // Another writer moved the job first.
                let fresh = self.get(id).await?;
                Err(invalid(fresh.status))
            }
        }
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();

        if filter.status.is_some() {
            conditions.push("status = $status");
        }

        if filter.image_id.is_some() {
            conditions.push("image_id = $image_id");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY created_at ASC, id ASC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.query(query);

        if let Some(status) = filter.status {
            result = result.bind(("status", status));
        }

        if let Some(image_id) = filter.image_id {
            result = result.bind(("image_id", image_id.to_string()));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Pending jobs created before `cutoff`, oldest first.
    pub async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE status = "pending" AND created_at < $cutoff
                ORDER BY created_at ASC
                "#,
            )
            .bind(("cutoff", cutoff.timestamp_micros()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Count jobs by status.
    pub async fn count_by_status(&self) -> Result<HashMap<JobStatus, u64>, DbError> {
        let mut result = self
            .db
            .query("SELECT status, count() AS count FROM job GROUP BY status")
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: JobStatus,
            count: i64,
        }

        let counts: Vec<StatusCount> = result.take(0)?;

        Ok(counts
            .into_iter()
            .map(|c| (c.status, c.count.max(0) as u64))
            .collect())
    }
}
