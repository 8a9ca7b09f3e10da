//! Core domain types for the thumbnail pipeline.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobStatus for the persisted state machine
//! - Image and Thumbnail records
//! - Broker messages and terminal events
//! - Pipeline configuration

mod config;
mod events;
mod id;
mod image;
mod job;

pub use config::PipelineConfig;
pub use events::{BrokerEvent, Delivery, DeliveryId, JobMessage, ThumbnailResult};
pub use id::{ImageId, JobId, ThumbnailId};
pub use image::{Image, Thumbnail, ThumbnailSize, thumbnail_filename};
pub use job::{Job, JobStatus};
