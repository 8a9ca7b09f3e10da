//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ThumbnailSize;

/// Configuration for the thumbnail pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of workers sharing the subscription. Above 1, jobs may
    /// finish out of enqueue order.
    pub concurrency: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Inserted before the image extension to name the thumbnail.
    pub filename_suffix: String,
    /// How often an idle worker asks the broker for work.
    pub poll_interval_ms: u64,
    /// Upper bound on a single generator call. `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_timeout_secs: Option<u64>,
    /// Period of the stale-pending sweep.
    pub sweep_interval_secs: u64,
    /// Age after which a pending job with no broker message is re-enqueued.
    pub stale_pending_secs: u64,
    /// Buffer size of the terminal-event channel.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            thumbnail_width: 100,
            thumbnail_height: 100,
            filename_suffix: "_thumb".to_string(),
            poll_interval_ms: 100,
            generate_timeout_secs: None,
            sweep_interval_secs: 30,
            stale_pending_secs: 60,
            event_capacity: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn thumbnail_size(&self) -> ThumbnailSize {
        ThumbnailSize::new(self.thumbnail_width, self.thumbnail_height)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn generate_timeout(&self) -> Option<Duration> {
        self.generate_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_pending(&self) -> Duration {
        Duration::from_secs(self.stale_pending_secs)
    }

    /// Set the worker pool size.
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the generator timeout.
    pub fn with_generate_timeout(mut self, timeout_secs: u64) -> Self {
        self.generate_timeout_secs = Some(timeout_secs);
        self
    }

    /// Set the worker poll interval.
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }
}
