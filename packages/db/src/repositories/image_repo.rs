//! Image record repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use thumbnailer_core::{Image, ImageId};

use crate::{Database, DbError, parse_record_id};

/// Repository for image metadata. Payloads live in blob storage.
#[derive(Clone)]
pub struct ImageRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct ImageRecord {
    id: Thing,
    filename: String,
    original_filename: String,
    content_type: String,
    size: u64,
    storage_key: String,
    created_at: DateTime<Utc>,
}

impl ImageRecord {
    fn into_image(self) -> Result<Image, DbError> {
        Ok(Image {
            id: parse_record_id(&self.id, ImageId::parse)?,
            filename: self.filename,
            original_filename: self.original_filename,
            content_type: self.content_type,
            size: self.size,
            storage_key: self.storage_key,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ImageCreate {
    filename: String,
    original_filename: String,
    content_type: String,
    size: u64,
    storage_key: String,
    created_at: DateTime<Utc>,
}

impl ImageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, image: &Image) -> Result<Image, DbError> {
        let create_data = ImageCreate {
            filename: image.filename.clone(),
            original_filename: image.original_filename.clone(),
            content_type: image.content_type.clone(),
            size: image.size,
            storage_key: image.storage_key.clone(),
            created_at: image.created_at,
        };

        let record: Option<ImageRecord> = self
            .db
            .create(("image", image.id.to_string()))
            .content(create_data)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create image".into()))?
            .into_image()
    }

    pub async fn get(&self, id: ImageId) -> Result<Image, DbError> {
        let record: Option<ImageRecord> = self.db.select(("image", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Image not found: {}", id)))?
            .into_image()
    }

    pub async fn delete(&self, id: ImageId) -> Result<(), DbError> {
        let _: Option<ImageRecord> = self.db.delete(("image", id.to_string())).await?;
        Ok(())
    }
}
