//! Copy progress hook.
//!
//! Gateways report bulk copy progress through [`ProgressCallback`] so the
//! library never depends on a terminal. The CLI renders it as `indicatif`
//! bars; everything else passes [`null_progress`].

use std::sync::Arc;

/// Receives progress of one bulk copy at a time.
///
/// Parallel copies call [`inc`](Self::inc) from several tasks at once.
pub trait ProgressCallback: Send + Sync {
    /// Number of objects (or versions) the copy will transfer.
    fn set_total(&self, total: u64);

    /// `delta` more objects were transferred or skipped.
    fn inc(&self, delta: u64);

    /// Label for the copy in progress, e.g. `demo -> demo-relocate`.
    fn set_message(&self, msg: String);

    /// The copy ended; `msg` summarizes it.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
