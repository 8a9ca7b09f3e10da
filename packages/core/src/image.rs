//! Image and thumbnail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImageId, JobId, ThumbnailId};

/// A full-size image accepted by the system. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    /// Name the image is stored under.
    pub filename: String,
    /// Name the image was uploaded with.
    pub original_filename: String,
    pub content_type: String,
    /// Payload length in bytes.
    pub size: u64,
    /// Location of the payload in blob storage.
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn new(
        filename: impl Into<String>,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            id: ImageId::new(),
            filename: filename.into(),
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size,
            storage_key: storage_key.into(),
            created_at: Utc::now(),
        }
    }
}

/// A small image derived from an [`Image`] by a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub id: ThumbnailId,
    /// The job that produced this thumbnail. At most one thumbnail per job.
    pub job_id: JobId,
    /// The image this thumbnail was derived from.
    pub image_id: ImageId,
    pub filename: String,
    /// Copied from the source image.
    pub content_type: String,
    /// Length of the generated payload in bytes.
    pub size: u64,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

/// Target box for thumbnail generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

impl std::fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Derive a thumbnail filename by inserting `suffix` before the extension.
///
/// `photo.jpg` with `_thumb` becomes `photo_thumb.jpg`; names without an
/// extension (or dotfiles like `.hidden`) get the suffix appended.
pub fn thumbnail_filename(filename: &str, suffix: &str) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}{}", &filename[..dot], suffix, &filename[dot..]),
        _ => format!("{filename}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(thumbnail_filename("photo.jpg", "_thumb"), "photo_thumb.jpg");
        assert_eq!(
            thumbnail_filename("archive.tar.png", "_thumb"),
            "archive.tar_thumb.png"
        );
    }

    #[test]
    fn suffix_is_appended_without_extension() {
        assert_eq!(thumbnail_filename("photo", "_thumb"), "photo_thumb");
        assert_eq!(thumbnail_filename(".hidden", "_thumb"), ".hidden_thumb");
    }

    #[test]
    fn default_size_is_100_square() {
        assert_eq!(ThumbnailSize::default().to_string(), "100x100");
    }
}
