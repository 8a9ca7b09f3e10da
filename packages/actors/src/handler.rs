//! Delivery handler trait.

use std::future::Future;
use std::pin::Pin;

use thumbnailer_core::{Delivery, ThumbnailResult};

/// Result type for delivery handlers. The error is the failure reason that
/// is published with the `Failed` event.
pub type HandlerResult = Result<Option<ThumbnailResult>, String>;

/// Future type for async delivery handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for delivery handlers.
///
/// Workers call the handler once per delivery and acknowledge whatever it
/// returns. Handlers contain their own errors.
pub trait MessageHandler: Send + Sync + 'static {
    /// Process a delivery and return the outcome to acknowledge.
    fn handle(&self, delivery: &Delivery) -> HandlerFuture;
}
