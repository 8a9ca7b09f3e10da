//! Repository implementations for database operations.

mod image_repo;
mod job_repo;
mod message_repo;
mod thumbnail_repo;

pub use image_repo::ImageRepository;
pub use job_repo::{JobFilter, JobRepository};
pub use message_repo::{MessageRepository, StoredMessage};
pub use thumbnail_repo::ThumbnailRepository;
