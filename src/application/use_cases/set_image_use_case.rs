//! Binds image requests to UI targets.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::application::dto::{CompletionFn, FrameFn, ImageCallbacks, ProgressFn};
use crate::application::services::CallbackQueue;
use crate::domain::entities::{FetchEvent, FetchId, FetchRequest, LoadedImage};
use crate::domain::errors::FetchError;
use crate::domain::ports::ImageTarget;
use crate::infrastructure::image::{FetchCoordinator, FetchHandle};

/// Entry point the UI layer calls when an element becomes responsible for
/// an image.
#[derive(Clone, Debug)]
pub struct SetImageUseCase {
    coordinator: FetchCoordinator,
}

struct Delivery {
    target: Arc<dyn ImageTarget>,
    id: FetchId,
    queue: CallbackQueue,
    progress: Option<ProgressFn>,
    frame: Option<FrameFn>,
    completion: Option<CompletionFn>,
}

impl Delivery {
    fn deliver(&mut self, event: FetchEvent) {
        match event {
            FetchEvent::Progress { received, total } => {
                if let Some(progress) = self.progress.clone() {
                    self.queue
                        .execute_in_order(move || progress(received, total));
                }
            }
            FetchEvent::Frame(frame) => {
                let target = self.target.clone();
                let callback = self.frame.clone();
                let id = self.id;
                self.queue.execute_in_order(move || {
                    if target.current_task() == Some(id) {
                        target.display_partial(&frame);
                    }
                    if let Some(callback) = callback {
                        callback(&frame);
                    }
                });
            }
            FetchEvent::Completed(result) => {
                let target = self.target.clone();
                let completion = self.completion.take();
                let id = self.id;
                self.queue
                    .execute_in_order(move || finish(&*target, id, result, completion));
            }
        }
    }
}

fn finish(
    target: &dyn ImageTarget,
    id: FetchId,
    result: Result<LoadedImage, FetchError>,
    completion: Option<CompletionFn>,
) {
    if let Ok(loaded) = &result {
        if target.current_task() == Some(id) {
            target.display(loaded.image.clone());
        } else {
            debug!(id = %id, key = %loaded.key, "Target was rebound, not displaying");
        }
    }
    if let Some(completion) = completion {
        completion(result);
    }
}

impl SetImageUseCase {
    /// Creates the use case over a coordinator.
    #[must_use]
    pub const fn new(coordinator: FetchCoordinator) -> Self {
        Self { coordinator }
    }

    /// Starts loading `request` into `target` and returns the handle the
    /// caller keeps to cancel when the element is reused or hidden.
    ///
    /// The target is bound to the new handle first, so results of any
    /// earlier fetch for the same target are no longer displayed.
    /// A memory hit is delivered before this returns when `queue` runs
    /// jobs inline.
    pub fn set_image(
        &self,
        target: Arc<dyn ImageTarget>,
        request: FetchRequest,
        queue: CallbackQueue,
        callbacks: ImageCallbacks,
    ) -> FetchHandle {
        let (handle, mut events) = self.coordinator.fetch(request);
        target.bind_task(handle.id());

        let ImageCallbacks {
            progress,
            frame,
            completion,
        } = callbacks;
        let mut delivery = Delivery {
            target,
            id: handle.id(),
            queue,
            progress,
            frame,
            completion,
        };

        let pending = match events.try_next() {
            Some(FetchEvent::Completed(result)) => {
                trace!(id = %handle.id(), "Delivering immediate result");
                let Delivery {
                    target,
                    id,
                    queue,
                    completion,
                    ..
                } = delivery;
                queue.execute(move || finish(&*target, id, result, completion));
                return handle;
            }
            other => other,
        };

        let runtime = delivery.queue.runtime(self.coordinator.runtime());
        runtime.spawn(async move {
            if let Some(event) = pending {
                delivery.deliver(event);
            }
            while let Some(event) = events.next().await {
                delivery.deliver(event);
            }
        });
        handle
    }

    /// Cancels a handle returned by [`Self::set_image`]. Returns false if
    /// it already finished.
    pub fn cancel(&self, handle: &FetchHandle) -> bool {
        handle.cancel()
    }
}
