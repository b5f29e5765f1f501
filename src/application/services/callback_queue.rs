//! Execution contexts for delivering results to the caller.

use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Work posted to a [`CallbackQueue`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where callbacks run.
#[derive(Clone, Default)]
pub enum CallbackQueue {
    /// On whatever task produced the result.
    #[default]
    Untouched,
    /// On a task of the given runtime.
    Dispatch(Handle),
    /// Always posted to the main queue, even from the main thread.
    MainAsync(MainQueue),
    /// Inline when already on the main thread, posted otherwise.
    MainCurrentOrAsync(MainQueue),
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untouched => write!(f, "Untouched"),
            Self::Dispatch(_) => write!(f, "Dispatch"),
            Self::MainAsync(_) => write!(f, "MainAsync"),
            Self::MainCurrentOrAsync(_) => write!(f, "MainCurrentOrAsync"),
        }
    }
}

impl CallbackQueue {
    /// Runs `job` on this queue. Independent calls are not ordered with
    /// respect to each other on `Dispatch`.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Self::Untouched => job(),
            Self::Dispatch(handle) => {
                handle.spawn(async move { job() });
            }
            Self::MainAsync(main) => main.post(Box::new(job)),
            Self::MainCurrentOrAsync(main) => {
                if main.is_current() {
                    job();
                } else {
                    main.post(Box::new(job));
                }
            }
        }
    }

    /// Runs `job` from a task already running on [`Self::runtime`]. Calls
    /// made in sequence from one task run in that order.
    pub(crate) fn execute_in_order(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Self::Untouched | Self::Dispatch(_) => job(),
            Self::MainAsync(_) | Self::MainCurrentOrAsync(_) => self.execute(job),
        }
    }

    /// Runtime a forwarding task should run on for this queue.
    pub(crate) fn runtime(&self, fallback: &Handle) -> Handle {
        match self {
            Self::Dispatch(handle) => handle.clone(),
            _ => fallback.clone(),
        }
    }

    /// Returns true if a job would run before `execute` returns.
    #[must_use]
    pub fn runs_inline(&self) -> bool {
        match self {
            Self::Untouched => true,
            Self::Dispatch(_) | Self::MainAsync(_) => false,
            Self::MainCurrentOrAsync(main) => main.is_current(),
        }
    }
}

/// Sending side of the queue drained by the UI-owning thread.
#[derive(Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Job>,
    owner: Arc<OnceLock<ThreadId>>,
}

/// Receiving side, owned by the UI thread.
pub struct MainQueueRunner {
    rx: mpsc::UnboundedReceiver<Job>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl MainQueue {
    /// Creates a queue and its runner. The first thread that drives the
    /// runner becomes the main thread.
    #[must_use]
    pub fn new() -> (Self, MainQueueRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let owner = Arc::new(OnceLock::new());
        (
            Self {
                tx,
                owner: owner.clone(),
            },
            MainQueueRunner { rx, owner },
        )
    }

    /// Returns true on the thread that drives the runner.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            error!("Main queue runner is gone, dropping callback");
        }
    }
}

impl MainQueueRunner {
    fn claim(&self) {
        let current = thread::current().id();
        if *self.owner.get_or_init(|| current) != current {
            error!("Main queue driven from a second thread");
        }
    }

    /// Runs every job queued so far and returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        self.claim();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "Drained main queue");
        }
        ran
    }

    /// Runs jobs until every [`MainQueue`] is dropped.
    pub async fn run(mut self) {
        self.claim();
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |value: u32| -> Job {
            let sink = sink.clone();
            Box::new(move || sink.lock().push(value))
        };
        (log, make)
    }

    #[test]
    fn test_untouched_runs_inline() {
        let (log, job) = recorder();
        CallbackQueue::Untouched.execute(job(1));
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn test_main_async_waits_for_runner() {
        let (main, mut runner) = MainQueue::new();
        runner.run_pending();
        let queue = CallbackQueue::MainAsync(main);
        let (log, job) = recorder();

        queue.execute(job(1));
        queue.execute(job(2));
        assert!(log.lock().is_empty());
        assert_eq!(runner.run_pending(), 2);
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn test_main_current_runs_inline_on_owner() {
        let (main, mut runner) = MainQueue::new();
        runner.run_pending();
        let queue = CallbackQueue::MainCurrentOrAsync(main);
        assert!(queue.runs_inline());

        let (log, job) = recorder();
        queue.execute(job(7));
        assert_eq!(*log.lock(), vec![7]);
    }

    #[test]
    fn test_main_current_posts_from_other_thread() {
        let (main, mut runner) = MainQueue::new();
        runner.run_pending();
        let queue = CallbackQueue::MainCurrentOrAsync(main);
        let (log, job) = recorder();

        let job = job(3);
        let remote = queue.clone();
        thread::spawn(move || {
            assert!(!remote.runs_inline());
            remote.execute(job);
        })
        .join()
        .unwrap();

        assert!(log.lock().is_empty());
        runner.run_pending();
        assert_eq!(*log.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_dispatch_runs_on_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        CallbackQueue::Dispatch(Handle::current()).execute(move || {
            let _ = tx.send(Handle::try_current().is_ok());
        });
        assert!(rx.await.unwrap());
    }
}
