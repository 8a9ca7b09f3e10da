//! Actor system for the thumbnail pipeline.
//!
//! # Architecture
//!
//! - `BrokerActor` - Durable FIFO of job messages with one subscription,
//!   reached through the cloneable [`BrokerClient`]
//! - `Supervisor` - Owns the worker pool and the listener, runs the sweep
//! - `WorkerActor` - Pulls deliveries and runs the [`MessageHandler`]
//! - `ListenerActor` - Finalizes jobs from terminal broker events
//! - [`ThumbnailPipeline`] - The handler that turns a job into a thumbnail
//!
//! # Usage
//!
//! ```ignore
//! use actors::{PipelineDeps, ResizeGenerator, start_pipeline};
//!
//! let deps = PipelineDeps::stored(db, storage, Arc::new(ResizeGenerator));
//! let pipeline = start_pipeline(deps, PipelineConfig::default()).await?;
//!
//! let image = pipeline.ingest().store("cat.png", "image/png", bytes).await?;
//! let job = pipeline.producer().submit_thumbnail_job(&image).await?;
//!
//! pipeline.shutdown().await;
//! ```

mod broker;
mod broker_actor;
mod collaborators;
mod error;
mod generator;
mod handler;
mod listener_actor;
mod messages;
mod pipeline;
mod producer;
mod supervisor;
mod worker_actor;

pub use broker::BrokerClient;
pub use broker_actor::BrokerActor;
pub use collaborators::{
    GenerateFuture, GenerationError, ImageIngest, ImageStore, ImageStoreError, StoreFuture,
    StoredImageStore, ThumbnailGenerator, content_type_for,
};
pub use error::{BrokerError, PipelineError};
pub use generator::ResizeGenerator;
pub use handler::{HandlerFuture, HandlerResult, MessageHandler};
pub use listener_actor::{ListenerActor, Reconciliation, reconcile_event};
pub use messages::{
    AckOutcome, BrokerMessage, BrokerStats, ListenerMessage, ListenerStats, SubscriptionId,
    SupervisorMessage, WorkerMessage,
};
pub use pipeline::ThumbnailPipeline;
pub use producer::Producer;
pub use supervisor::{
    Pipeline, PipelineDeps, Supervisor, SupervisorArgs, start_pipeline, start_supervisor,
};
pub use worker_actor::WorkerActor;

pub use thumbnailer_core::Delivery;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
