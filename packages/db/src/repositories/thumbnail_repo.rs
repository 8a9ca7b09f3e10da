//! Thumbnail record repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use thumbnailer_core::{ImageId, JobId, Thumbnail, ThumbnailId};

use crate::{Database, DbError, parse_record_id};

/// Repository for thumbnail metadata. Payloads live in blob storage.
#[derive(Clone)]
pub struct ThumbnailRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct ThumbnailRecord {
    id: Thing,
    job_id: JobId,
    image_id: ImageId,
    filename: String,
    content_type: String,
    size: u64,
    storage_key: String,
    created_at: DateTime<Utc>,
}

impl ThumbnailRecord {
    fn into_thumbnail(self) -> Result<Thumbnail, DbError> {
        Ok(Thumbnail {
            id: parse_record_id(&self.id, ThumbnailId::parse)?,
            job_id: self.job_id,
            image_id: self.image_id,
            filename: self.filename,
            content_type: self.content_type,
            size: self.size,
            storage_key: self.storage_key,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ThumbnailCreate {
    job_id: JobId,
    image_id: ImageId,
    filename: String,
    content_type: String,
    size: u64,
    storage_key: String,
    created_at: DateTime<Utc>,
}

impl ThumbnailRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a thumbnail record. Fails if the job already has one.
    pub async fn create(&self, thumbnail: &Thumbnail) -> Result<Thumbnail, DbError> {
        let create_data = ThumbnailCreate {
            job_id: thumbnail.job_id,
            image_id: thumbnail.image_id,
            filename: thumbnail.filename.clone(),
            content_type: thumbnail.content_type.clone(),
            size: thumbnail.size,
            storage_key: thumbnail.storage_key.clone(),
            created_at: thumbnail.created_at,
        };

        let record: Option<ThumbnailRecord> = self
            .db
            .create(("thumbnail", thumbnail.id.to_string()))
            .content(create_data)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create thumbnail".into()))?
            .into_thumbnail()
    }

    pub async fn get(&self, id: ThumbnailId) -> Result<Thumbnail, DbError> {
        let record: Option<ThumbnailRecord> =
            self.db.select(("thumbnail", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Thumbnail not found: {}", id)))?
            .into_thumbnail()
    }

    /// Find the thumbnail produced by a job, if any.
    pub async fn get_by_job(&self, job_id: JobId) -> Result<Option<Thumbnail>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM thumbnail WHERE job_id = $job_id LIMIT 1")
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<ThumbnailRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .map(ThumbnailRecord::into_thumbnail)
            .transpose()
    }

    /// Count thumbnails derived from an image.
    pub async fn count_for_image(&self, image_id: ImageId) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM thumbnail WHERE image_id = $image_id GROUP ALL")
            .bind(("image_id", image_id.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct CountResult {
            count: i64,
        }

        let counts: Vec<CountResult> = result.take(0)?;

        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }

    pub async fn delete(&self, id: ThumbnailId) -> Result<(), DbError> {
        let _: Option<ThumbnailRecord> = self.db.delete(("thumbnail", id.to_string())).await?;
        Ok(())
    }
}
