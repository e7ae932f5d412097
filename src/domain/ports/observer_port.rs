//! Observer port: lifecycle notifications for interested components.

use crate::domain::entities::{ImageSource, ResourceUrl};
use crate::domain::errors::ResourceError;

/// Receiver of resource lifecycle events.
///
/// Every method has a default no-op body, so observers implement only what
/// they care about. For any single URL, events arrive in the order
/// `image_will_start_downloading`, zero or more `image_download_progress`,
/// then exactly one of `image_did_load` / `image_did_fail`. Callbacks run
/// on worker threads and must not block.
pub trait ResourceObserver: Send + Sync {
    /// An image was served, from any tier.
    fn image_did_load(&self, _url: &ResourceUrl, _source: ImageSource) {}

    /// A load reached a terminal failure.
    fn image_did_fail(&self, _url: &ResourceUrl, _error: &ResourceError) {}

    /// Download progress in `[0, 1]`.
    fn image_download_progress(&self, _url: &ResourceUrl, _progress: f64) {}

    /// A network download is about to start for the URL.
    fn image_will_start_downloading(&self, _url: &ResourceUrl) {}
}
