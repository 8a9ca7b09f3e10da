//! Default thumbnail generator built on the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use thumbnailer_core::ThumbnailSize;

use crate::collaborators::{GenerateFuture, GenerationError, ThumbnailGenerator};

/// Decodes the payload, fits it within the target box keeping the aspect
/// ratio, and re-encodes it in the source format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeGenerator;

impl ThumbnailGenerator for ResizeGenerator {
    fn generate(&self, payload: Bytes, content_type: &str, size: ThumbnailSize) -> GenerateFuture {
        let content_type = content_type.to_string();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || resize(&payload, &content_type, size)).await {
                Ok(result) => result,
                Err(e) => Err(GenerationError(format!("resize task failed: {e}"))),
            }
        })
    }
}

fn resize(payload: &[u8], content_type: &str, size: ThumbnailSize) -> Result<Bytes, GenerationError> {
    let format = ImageFormat::from_mime_type(content_type)
        .or_else(|| image::guess_format(payload).ok())
        .ok_or_else(|| GenerationError(format!("unsupported content type {content_type}")))?;

    let decoded = image::load_from_memory_with_format(payload, format)
        .map_err(|e| GenerationError(format!("decode failed: {e}")))?;

    let mut thumbnail = decoded.thumbnail(size.width.max(1), size.height.max(1));
    if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel.
        thumbnail = DynamicImage::ImageRgb8(thumbnail.to_rgb8());
    }

    let mut out = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut out, format)
        .map_err(|e| GenerationError(format!("encode failed: {e}")))?;

    Ok(Bytes::from(out.into_inner()))
}
