//! Progress reporting for backup jobs.
//!
//! The engine reports files examined through [`ProgressCallback`] so that the
//! rendering backend (an `indicatif` spinner, or nothing at all for cron
//! runs) stays outside the sync logic.

use std::sync::Arc;

/// Receives progress updates from a running backup job.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// by concurrent uploads.
pub trait ProgressCallback: Send + Sync {
    /// Advance progress by `delta` files.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
