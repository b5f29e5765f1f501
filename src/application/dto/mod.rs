//! Data transfer objects.

mod image_callbacks;

pub use image_callbacks::{CompletionFn, FrameFn, ImageCallbacks, ProgressFn};
