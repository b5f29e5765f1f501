//! Fetch coordination.
//!
//! Resolves requests through memory, disk and network, in that order.
//! Concurrent requests for the same [`CacheKey`] share one operation; every
//! attached caller receives the same result.
//!
//! ```text
//! fetch ─► memory hit? ──yes──► Completed (before fetch returns)
//!              │ no
//!              ▼
//!        in-flight op for key? ──yes──► attach as waiter
//!              │ no
//!              ▼
//!        spawn op: disk(key) ─► disk(original key) + pipeline ─► network
//!                                                                 │
//!              memory + disk population ◄── decode + pipeline ◄───┘
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheSerializer, DecodedImage, FetchEvent, FetchId, FetchRequest, ImageSource,
    LoadedImage, ProgressiveFrame, ProgressiveOptions, TransformPipeline,
};
use crate::domain::errors::FetchError;
use crate::domain::ports::{ByteStream, ImageCachePort, ImageFetcherPort};
use crate::domain::services::process_decoded;

use super::cache::ImageCache;
use super::gate::PriorityGate;
use super::progressive::ProgressiveDecodeStream;
use super::serializer::{decode_image, encode_for_cache};

/// Configuration for [`FetchCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum downloads running at once.
    pub max_concurrent_downloads: usize,
    /// Retries after the first attempt for retryable network errors.
    pub max_retries: u32,
    /// Base delay between retries; attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Counters exposed by [`FetchCoordinator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Network attempts started, retries included.
    pub network_requests: u64,
    /// Requests attached to an operation already in flight.
    pub coalesced_requests: u64,
    /// Operations currently in flight.
    pub in_flight: usize,
}

impl std::fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fetch: {} network requests, {} coalesced, {} in flight",
            self.network_requests, self.coalesced_requests, self.in_flight
        )
    }
}

struct Waiter {
    tx: mpsc::UnboundedSender<FetchEvent>,
    finished: Arc<AtomicBool>,
}

impl Waiter {
    fn finish(self, result: Result<LoadedImage, FetchError>) {
        self.finished.store(true, Ordering::Release);
        // A dropped receiver only means nobody listens any more.
        let _ = self.tx.send(FetchEvent::Completed(result));
    }
}

struct Operation {
    key: CacheKey,
    token: CancellationToken,
    waiters: Mutex<HashMap<FetchId, Waiter>>,
    reported: AtomicU64,
    shown: AtomicU64,
    frames: AtomicU32,
}

impl Operation {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            token: CancellationToken::new(),
            waiters: Mutex::new(HashMap::new()),
            reported: AtomicU64::new(0),
            shown: AtomicU64::new(0),
            frames: AtomicU32::new(0),
        }
    }

    fn broadcast(&self, event: &FetchEvent) {
        for waiter in self.waiters.lock().values() {
            let _ = waiter.tx.send(event.clone());
        }
    }

    /// Reports progress only past the high-water mark, so retries never
    /// make it go backwards.
    fn progress(&self, received: u64, total: Option<u64>) {
        let previous = self.reported.fetch_max(received, Ordering::AcqRel);
        if received > previous {
            self.broadcast(&FetchEvent::Progress { received, total });
        }
    }

    /// Broadcasts a partial frame that shows more bytes than any frame
    /// before it. A retried download starts a new decode stream, so its
    /// early frames are dropped and indices continue across attempts.
    fn frame(&self, mut frame: ProgressiveFrame) {
        let previous = self.shown.fetch_max(frame.bytes_received, Ordering::AcqRel);
        if frame.bytes_received <= previous {
            trace!(key = %self.key, received = frame.bytes_received, "Skipping repeated frame");
            return;
        }
        frame.index = self.frames.fetch_add(1, Ordering::AcqRel);
        trace!(key = %self.key, index = frame.index, "Emitting partial frame");
        self.broadcast(&FetchEvent::Frame(frame));
    }
}

struct Inner {
    cache: Arc<ImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Operation>>>,
    gate: PriorityGate,
    config: CoordinatorConfig,
    runtime: Handle,
    next_id: AtomicU64,
    network_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

/// Entry point for image requests.
///
/// Cheap to clone; clones share in-flight operations. Separate coordinators
/// built on the same [`ImageCache`] share cached results but not in-flight
/// operations.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Caller-side handle of one fetch.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    id: FetchId,
    key: CacheKey,
    finished: Arc<AtomicBool>,
    inner: Weak<Inner>,
}

impl FetchHandle {
    /// Identifier of this attachment.
    #[must_use]
    pub const fn id(&self) -> FetchId {
        self.id
    }

    /// Key of the requested artifact.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns true once the terminal event was queued for this handle.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Detaches this caller, who receives `Cancelled`. The shared operation
    /// is cancelled when no caller remains.
    ///
    /// Returns false if the fetch already finished or was cancelled.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.detach(self.id, &self.key))
    }
}

/// Event receiver of one fetch. Yields exactly one terminal event.
#[derive(Debug)]
pub struct FetchEvents {
    rx: mpsc::UnboundedReceiver<FetchEvent>,
    done: bool,
}

impl FetchEvents {
    fn observe(&mut self, event: Option<FetchEvent>) -> Option<FetchEvent> {
        match event {
            Some(event) => {
                self.done = event.is_terminal();
                Some(event)
            }
            // The operation vanished without reporting (runtime shut down).
            None => {
                self.done = true;
                Some(FetchEvent::Completed(Err(FetchError::Cancelled)))
            }
        }
    }

    /// Waits for the next event. Returns `None` after the terminal event.
    pub async fn next(&mut self) -> Option<FetchEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event)
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<FetchEvent> {
        if self.done {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => self.observe(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.observe(None),
        }
    }

    /// Skips progress and frames and waits for the result.
    ///
    /// # Errors
    /// Returns the fetch error, or `Cancelled` if the result was already taken.
    pub async fn result(mut self) -> Result<LoadedImage, FetchError> {
        while let Some(event) = self.next().await {
            if let FetchEvent::Completed(result) = event {
                return result;
            }
        }
        Err(FetchError::Cancelled)
    }

    /// Returns the result if it is already queued, skipping earlier events.
    pub fn try_result(&mut self) -> Option<Result<LoadedImage, FetchError>> {
        while let Some(event) = self.try_next() {
            if let FetchEvent::Completed(result) = event {
                return Some(result);
            }
        }
        None
    }
}

impl FetchCoordinator {
    /// Creates a coordinator that runs operations on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        cache: Arc<ImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_runtime(cache, fetcher, config, Handle::current())
    }

    /// Creates a coordinator that runs operations on `runtime`. Fetches may
    /// then be issued from threads outside the runtime.
    #[must_use]
    pub fn with_runtime(
        cache: Arc<ImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
        config: CoordinatorConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                fetcher,
                in_flight: Mutex::new(HashMap::new()),
                gate: PriorityGate::new(config.max_concurrent_downloads),
                config,
                runtime,
                next_id: AtomicU64::new(1),
                network_requests: AtomicU64::new(0),
                coalesced_requests: AtomicU64::new(0),
            }),
        }
    }

    /// Shared cache behind this coordinator.
    #[must_use]
    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.inner.cache
    }

    /// Runtime operations are spawned on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            network_requests: self.inner.network_requests.load(Ordering::Relaxed),
            coalesced_requests: self.inner.coalesced_requests.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.lock().len(),
        }
    }

    /// Starts or joins the fetch for `request`.
    ///
    /// A memory hit is queued on the returned events before this returns, so
    /// [`FetchEvents::try_result`] sees it immediately.
    pub fn fetch(&self, request: FetchRequest) -> (FetchHandle, FetchEvents) {
        let inner = &self.inner;
        let id = FetchId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let key = request.key();
        let (tx, rx) = mpsc::unbounded_channel();
        let waiter = Waiter {
            tx,
            finished: Arc::new(AtomicBool::new(false)),
        };
        let handle = FetchHandle {
            id,
            key: key.clone(),
            finished: waiter.finished.clone(),
            inner: Arc::downgrade(inner),
        };
        let events = FetchEvents { rx, done: false };

        if let Err(e) = request.pipeline.validate() {
            debug!(id = %id, error = %e, "Rejected request");
            waiter.finish(Err(e));
            return (handle, events);
        }

        if !request.options.force_refresh
            && let Some(image) = inner.cache.memory().get(&key)
        {
            trace!(id = %id, key = %key, "Served from memory");
            waiter.finish(Ok(LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            }));
            return (handle, events);
        }

        let op = {
            let mut in_flight = inner.in_flight.lock();
            match in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => {
                    entry.get().waiters.lock().insert(id, waiter);
                    inner.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %id, key = %key, "Joined in-flight fetch");
                    return (handle, events);
                }
                Entry::Vacant(entry) => {
                    let op = Arc::new(Operation::new(key.clone()));
                    op.waiters.lock().insert(id, waiter);
                    entry.insert(op.clone());
                    op
                }
            }
        };

        debug!(id = %id, key = %key, locator = %request.locator, "Starting fetch");
        let task_inner = inner.clone();
        inner.runtime.spawn(async move { task_inner.run(op, request).await });
        (handle, events)
    }
}

impl Inner {
    async fn run(self: Arc<Self>, op: Arc<Operation>, request: FetchRequest) {
        // Resolution is polled first so a progressive download sees the
        // cancellation itself and closes its decode stream.
        let result = tokio::select! {
            biased;
            result = self.resolve(&op, &request) => result,
            () = op.token.cancelled() => Err(FetchError::Cancelled),
        };

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight
                .get(&op.key)
                .is_some_and(|current| Arc::ptr_eq(current, &op))
            {
                in_flight.remove(&op.key);
            }
        }

        let waiters: Vec<Waiter> = op.waiters.lock().drain().map(|(_, w)| w).collect();
        match &result {
            Ok(loaded) => debug!(
                key = %op.key,
                source = %loaded.source,
                waiters = waiters.len(),
                "Fetch completed"
            ),
            Err(e) => debug!(key = %op.key, error = %e, waiters = waiters.len(), "Fetch failed"),
        }
        for waiter in waiters {
            waiter.finish(result.clone());
        }
    }

    /// Removes one waiter. Cancels the operation if it was the last one.
    fn detach(&self, id: FetchId, key: &CacheKey) -> bool {
        let (waiter, orphaned) = {
            let mut in_flight = self.in_flight.lock();
            let Some(op) = in_flight.get(key).cloned() else {
                return false;
            };
            let mut waiters = op.waiters.lock();
            let Some(waiter) = waiters.remove(&id) else {
                return false;
            };
            let last = waiters.is_empty();
            drop(waiters);
            if last {
                in_flight.remove(key);
            }
            (waiter, last.then_some(op))
        };

        if let Some(op) = orphaned {
            op.token.cancel();
            debug!(id = %id, key = %key, "Cancelled fetch, no waiters left");
        } else {
            debug!(id = %id, key = %key, "Detached from shared fetch");
        }
        waiter.finish(Err(FetchError::Cancelled));
        true
    }

    async fn resolve(
        &self,
        op: &Operation,
        request: &FetchRequest,
    ) -> Result<LoadedImage, FetchError> {
        let key = &op.key;
        let options = &request.options;
        let first_frame = options.only_load_first_frame;

        if !options.force_refresh {
            if let Some(image) = self.cache.memory().get(key) {
                return Ok(loaded(key, image, ImageSource::MemoryCache));
            }

            if let Some(bytes) = self.cache.disk_bytes(key).await {
                match decode_and_process(Bytes::from(bytes), TransformPipeline::new(), first_frame)
                    .await
                {
                    Ok(image) => {
                        let image = Arc::new(image);
                        self.store_memory(key, &image);
                        trace!(key = %key, "Served from disk");
                        return Ok(loaded(key, image, ImageSource::DiskCache));
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Dropping corrupt disk cache entry");
                        self.cache.remove_disk_entry(key).await;
                    }
                }
            }

            if !key.is_original() {
                let original = key.original();
                if let Some(bytes) = self.cache.disk_bytes(&original).await {
                    let bytes = Bytes::from(bytes);
                    match decode_and_process(bytes.clone(), request.pipeline.clone(), first_frame)
                        .await
                    {
                        Ok(image) => {
                            let image = Arc::new(image);
                            self.store(key, &image, bytes, request, false).await;
                            trace!(key = %key, "Processed cached original");
                            return Ok(loaded(key, image, ImageSource::DiskCache));
                        }
                        Err(e) => {
                            warn!(key = %original, error = %e, "Dropping corrupt disk cache entry");
                            self.cache.remove_disk_entry(&original).await;
                        }
                    }
                }
            }
        }

        if options.only_from_cache {
            return Err(FetchError::NotCached {
                key: key.to_string(),
            });
        }

        let bytes = self.download(op, request).await?;
        let image = Arc::new(
            decode_and_process(bytes.clone(), request.pipeline.clone(), first_frame).await?,
        );
        self.store(key, &image, bytes, request, true).await;
        Ok(loaded(key, image, ImageSource::Network))
    }

    fn store_memory(&self, key: &CacheKey, image: &Arc<DecodedImage>) {
        if !self.cache.memory().put(key.clone(), image.clone()) {
            debug!(key = %key, cost = image.cost(), "Image too large for memory cache");
        }
    }

    /// Populates memory and, unless disabled, disk. `include_original`
    /// also stores the unprocessed bytes when the request asks for it.
    async fn store(
        &self,
        key: &CacheKey,
        image: &Arc<DecodedImage>,
        original: Bytes,
        request: &FetchRequest,
        include_original: bool,
    ) {
        let options = &request.options;
        self.store_memory(key, image);
        if options.cache_memory_only {
            return;
        }

        let processed = !request.pipeline.is_empty();
        let policy = options.serializer;
        if processed && policy == CacheSerializer::Original && request.pipeline.adds_alpha() {
            debug!(key = %key, "Pipeline adds alpha; formats without it store an opaque copy");
        }
        let mut writes = Vec::new();

        let encode_image = image.clone();
        let encode_source = original.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            encode_for_cache(policy, &encode_image, &encode_source, processed)
        })
        .await;
        match encoded {
            Ok(Ok(bytes)) => writes.extend(self.cache.spawn_disk_write(key.clone(), bytes)),
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to encode image for disk cache"),
            Err(e) => warn!(key = %key, error = %e, "Encode task failed"),
        }

        if include_original && processed && options.cache_original_image {
            writes.extend(
                self.cache
                    .spawn_disk_write(key.original(), original.to_vec()),
            );
        }

        if options.wait_for_cache {
            for write in writes {
                let _ = write.await;
            }
        }
    }

    async fn download(&self, op: &Operation, request: &FetchRequest) -> Result<Bytes, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.download_once(op, request).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay * attempt;
                    warn!(
                        key = %op.key,
                        attempt,
                        ?delay,
                        error = %e,
                        "Download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(
        &self,
        op: &Operation,
        request: &FetchRequest,
    ) -> Result<Bytes, FetchError> {
        let _permit = self
            .gate
            .acquire(request.options.priority)
            .await
            .ok_or(FetchError::Cancelled)?;
        self.network_requests.fetch_add(1, Ordering::Relaxed);

        let ByteStream { total, chunks } = self.fetcher.open(&request.locator).await?;
        match &request.options.progressive {
            Some(options) => {
                receive_progressive(op, chunks, total, options.clone(), &request.pipeline).await
            }
            None => receive_plain(op, chunks, total).await,
        }
    }
}

async fn receive_plain(
    op: &Operation,
    mut chunks: BoxStream<'static, Result<Bytes, FetchError>>,
    total: Option<u64>,
) -> Result<Bytes, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        body.extend_from_slice(&chunk?);
        op.progress(body.len() as u64, total);
    }
    Ok(Bytes::from(body))
}

async fn receive_progressive(
    op: &Operation,
    mut chunks: BoxStream<'static, Result<Bytes, FetchError>>,
    total: Option<u64>,
    options: ProgressiveOptions,
    pipeline: &TransformPipeline,
) -> Result<Bytes, FetchError> {
    let mut stream = ProgressiveDecodeStream::new(options, total);
    loop {
        let next = tokio::select! {
            biased;
            () = op.token.cancelled() => None,
            next = chunks.next() => Some(next),
        };
        let chunk = match next {
            None => return Err(abandon(op, &mut stream)),
            Some(None) => break,
            Some(Some(Ok(chunk))) => chunk,
            Some(Some(Err(e))) => {
                stream.fail();
                return Err(e);
            }
        };
        let job = stream.push(&chunk);
        op.progress(stream.bytes_received(), total);

        if let Some(job) = job {
            let pipeline = pipeline.clone();
            let partial = tokio::task::spawn_blocking(move || job.run(&pipeline)).await;
            if op.token.is_cancelled() {
                return Err(abandon(op, &mut stream));
            }
            if let Ok(Some(partial)) = partial
                && let Some(frame) = stream.emit(partial)
            {
                op.frame(frame);
            }
        }
    }
    match stream.complete() {
        Some(body) => Ok(Bytes::from(body)),
        None => Err(FetchError::decode(format!(
            "Progressive stream ended in {:?} state",
            stream.state()
        ))),
    }
}

fn abandon(op: &Operation, stream: &mut ProgressiveDecodeStream) -> FetchError {
    debug!(key = %op.key, received = stream.bytes_received(), "Progressive download cancelled");
    stream.cancel();
    FetchError::Cancelled
}

async fn decode_and_process(
    bytes: Bytes,
    pipeline: TransformPipeline,
    only_first_frame: bool,
) -> Result<DecodedImage, FetchError> {
    tokio::task::spawn_blocking(move || -> Result<DecodedImage, FetchError> {
        let decoded = decode_image(&bytes, only_first_frame)?;
        Ok(process_decoded(&pipeline, decoded))
    })
    .await
    .map_err(|e| FetchError::decode(format!("Decode task failed: {e}")))?
}

fn loaded(key: &CacheKey, image: Arc<DecodedImage>, source: ImageSource) -> LoadedImage {
    LoadedImage {
        key: key.clone(),
        image,
        source,
    }
}
