//! Progress-callback trait for per-item events (images, pages, slides).
//!
//! Inject an [`Arc<dyn ProgressCallback>`] to receive events as a batch
//! runs. The library never prints; the binaries forward these events to an
//! `indicatif` bar, tests count them.
//!
//! Items may complete concurrently, so implementations must be
//! `Send + Sync` and protect shared state themselves.

use std::sync::Arc;

/// Called by a batch as it processes each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ProgressCallback: Send + Sync {
    /// Called once before any item starts.
    fn on_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an item finishes successfully.
    ///
    /// * `done` : items finished so far, including this one
    /// * `label`: short description (image path, slide title)
    fn on_item_complete(&self, done: usize, total: usize, label: &str) {
        let _ = (done, total, label);
    }

    /// Called when an item is skipped or fails.
    fn on_item_error(&self, done: usize, total: usize, label: &str, error: &str) {
        let _ = (done, total, label, error);
    }

    /// Called once after every item has been attempted.
    fn on_finish(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProgressCallback for NoopProgressCallback {}

/// Shared handle type stored in the tool runners.
pub type SharedProgress = Arc<dyn ProgressCallback>;

/// The default handle: [`NoopProgressCallback`].
pub fn noop() -> SharedProgress {
    Arc::new(NoopProgressCallback)
}
