//! Port implemented by the UI layer for elements that display images.

use std::sync::Arc;

use crate::domain::entities::{DecodedImage, FetchId, ProgressiveFrame};

/// A UI element that can be bound to one fetch at a time.
///
/// Recycled elements are rebound to a new fetch; results of an older fetch
/// are not displayed on an element that has since been rebound.
pub trait ImageTarget: Send + Sync {
    /// Records the fetch now responsible for this element.
    fn bind_task(&self, task: FetchId);

    /// Returns the fetch currently responsible for this element.
    fn current_task(&self) -> Option<FetchId>;

    /// Shows the final image.
    fn display(&self, image: Arc<DecodedImage>);

    /// Shows a partial frame. Ignored by default.
    fn display_partial(&self, _frame: &ProgressiveFrame) {}
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Target that records everything it was asked to show.
    #[derive(Default)]
    pub struct RecordingTarget {
        task: Mutex<Option<FetchId>>,
        displayed: Mutex<Vec<Arc<DecodedImage>>>,
        partials: Mutex<Vec<u64>>,
    }

    impl RecordingTarget {
        /// Creates an unbound target.
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of final images displayed.
        pub fn displayed_count(&self) -> usize {
            self.displayed.lock().len()
        }

        /// Last final image displayed.
        pub fn last_displayed(&self) -> Option<Arc<DecodedImage>> {
            self.displayed.lock().last().cloned()
        }

        /// Bytes received for each partial frame shown.
        pub fn partial_progress(&self) -> Vec<u64> {
            self.partials.lock().clone()
        }
    }

    impl ImageTarget for RecordingTarget {
        fn bind_task(&self, task: FetchId) {
            *self.task.lock() = Some(task);
        }

        fn current_task(&self) -> Option<FetchId> {
            *self.task.lock()
        }

        fn display(&self, image: Arc<DecodedImage>) {
            self.displayed.lock().push(image);
        }

        fn display_partial(&self, frame: &ProgressiveFrame) {
            self.partials.lock().push(frame.bytes_received);
        }
    }
}
