//! Caller-supplied callbacks for one image request.

use std::sync::Arc;

use crate::domain::entities::{LoadedImage, ProgressiveFrame};
use crate::domain::errors::FetchError;

/// Progress callback: bytes received and expected total.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;
/// Partial frame callback.
pub type FrameFn = Arc<dyn Fn(&ProgressiveFrame) + Send + Sync>;
/// Terminal callback, called exactly once.
pub type CompletionFn = Box<dyn FnOnce(Result<LoadedImage, FetchError>) + Send>;

/// Optional callbacks invoked on the request's callback queue.
#[derive(Default)]
pub struct ImageCallbacks {
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) frame: Option<FrameFn>,
    pub(crate) completion: Option<CompletionFn>,
}

impl ImageCallbacks {
    /// No callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with non-decreasing byte counts while downloading.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    /// Called for each partial frame of a progressive request.
    #[must_use]
    pub fn on_frame(mut self, f: impl Fn(&ProgressiveFrame) + Send + Sync + 'static) -> Self {
        self.frame = Some(Arc::new(f));
        self
    }

    /// Called once with the result, including stale and cancelled ones.
    #[must_use]
    pub fn on_complete(
        mut self,
        f: impl FnOnce(Result<LoadedImage, FetchError>) + Send + 'static,
    ) -> Self {
        self.completion = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for ImageCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCallbacks")
            .field("progress", &self.progress.is_some())
            .field("frame", &self.frame.is_some())
            .field("completion", &self.completion.is_some())
            .finish()
    }
}
