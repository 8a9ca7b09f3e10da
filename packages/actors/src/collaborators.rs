//! Collaborators the pipeline depends on: where images come from and how
//! thumbnails are made.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;
use db::DbError;
use db::repositories::ImageRepository;
use storage::{Storage, StorageError, image_key};
use thumbnailer_core::{Image, ImageId, ThumbnailSize};

use crate::error::PipelineError;

/// Errors from an [`ImageStore`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageStoreError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Image store error: {0}")]
    Backend(String),
}

impl From<DbError> for ImageStoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ImageStoreError::NotFound(what),
            other => ImageStoreError::Backend(other.to_string()),
        }
    }
}

impl From<StorageError> for ImageStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ImageStoreError::NotFound(key),
            other => ImageStoreError::Backend(other.to_string()),
        }
    }
}

impl From<ImageStoreError> for PipelineError {
    fn from(err: ImageStoreError) -> Self {
        match err {
            ImageStoreError::NotFound(what) => PipelineError::NotFound(what),
            ImageStoreError::Backend(msg) => PipelineError::Persistence(msg),
        }
    }
}

/// Failure reported by a [`ThumbnailGenerator`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct GenerationError(pub String);

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        PipelineError::Generation(err.0)
    }
}

/// Future type returned by image store lookups.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ImageStoreError>> + Send + 'a>>;

/// Future type returned by thumbnail generators.
pub type GenerateFuture = Pin<Box<dyn Future<Output = Result<Bytes, GenerationError>> + Send>>;

/// Read access to uploaded images.
pub trait ImageStore: Send + Sync + 'static {
    /// Image metadata by id.
    fn get_image(&self, id: ImageId) -> StoreFuture<'_, Image>;

    /// The full image payload.
    fn read_payload<'a>(&'a self, image: &'a Image) -> StoreFuture<'a, Bytes>;
}

/// Derives a thumbnail payload from a full image. Opaque to the pipeline.
pub trait ThumbnailGenerator: Send + Sync + 'static {
    fn generate(&self, payload: Bytes, content_type: &str, size: ThumbnailSize) -> GenerateFuture;
}

/// [`ImageStore`] over the image table and blob storage.
#[derive(Clone)]
pub struct StoredImageStore {
    images: ImageRepository,
    storage: Storage,
}

impl StoredImageStore {
    pub fn new(images: ImageRepository, storage: Storage) -> Self {
        Self { images, storage }
    }
}

impl ImageStore for StoredImageStore {
    fn get_image(&self, id: ImageId) -> StoreFuture<'_, Image> {
        Box::pin(async move { self.images.get(id).await.map_err(ImageStoreError::from) })
    }

    fn read_payload<'a>(&'a self, image: &'a Image) -> StoreFuture<'a, Bytes> {
        Box::pin(async move {
            self.storage
                .get(&image.storage_key)
                .await
                .map_err(ImageStoreError::from)
        })
    }
}

/// Stores uploaded payloads and records their metadata.
///
/// Stands in for the upload path: the binary uses it to ingest files and
/// tests use it to seed images.
#[derive(Clone)]
pub struct ImageIngest {
    images: ImageRepository,
    storage: Storage,
}

impl ImageIngest {
    pub fn new(images: ImageRepository, storage: Storage) -> Self {
        Self { images, storage }
    }

    /// Store `payload` and create its image record. The stored filename is
    /// the image id plus the original extension.
    pub async fn store(
        &self,
        original_filename: &str,
        content_type: &str,
        payload: Bytes,
    ) -> Result<Image, PipelineError> {
        let id = ImageId::new();
        let filename = match Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
        {
            Some(ext) => format!("{id}.{}", ext.to_ascii_lowercase()),
            None => id.to_string(),
        };
        let storage_key = image_key(id, &filename);

        self.storage.put(&storage_key, payload.clone()).await?;

        let mut image = Image::new(
            filename,
            original_filename,
            content_type,
            payload.len() as u64,
            storage_key,
        );
        image.id = id;

        let created = self.images.create(&image).await?;
        tracing::info!(image_id = %created.id, "Stored image {}", created.original_filename);
        Ok(created)
    }

    /// Remove an image record and its payload.
    pub async fn remove(&self, image: &Image) -> Result<(), PipelineError> {
        self.images.delete(image.id).await?;
        self.storage.delete(&image.storage_key).await?;
        Ok(())
    }
}

/// Best guess at a content type from a file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a/b/cat.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("dog.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn image_store_errors_map_to_pipeline_errors() {
        let err: PipelineError = ImageStoreError::NotFound("img".into()).into();
        assert!(err.is_not_found());
        let err: PipelineError = ImageStoreError::from(StorageError::NotFound("k".into())).into();
        assert!(err.is_not_found());
        let err: PipelineError = GenerationError("corrupt".into()).into();
        assert!(matches!(err, PipelineError::Generation(ref m) if m == "corrupt"));
    }
}
