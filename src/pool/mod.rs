//! Bounded concurrent download executor.
//!
//! N worker tasks pull [`DownloadJob`]s from a bounded queue and emit exactly
//! one [`DownloadResult`] per dequeued job onto a bounded result stream. The
//! pool itself never fails because a job failed; worker-level errors travel
//! through the result stream only.
//!
//! # Example
//!
//! ```no_run
//! use igscraper_core::pool::WorkerPool;
//!
//! # async fn example(
//! #     downloader: std::sync::Arc<dyn igscraper_core::pool::Downloader>,
//! #     storage: std::sync::Arc<dyn igscraper_core::pool::PhotoStore>,
//! #     limiter: std::sync::Arc<dyn igscraper_core::limiter::RateLimit>,
//! #     job: igscraper_core::pool::DownloadJob,
//! # ) -> Result<(), igscraper_core::ScrapeError> {
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let mut pool = WorkerPool::new(4, downloader, storage, limiter, cancel);
//! pool.start();
//! let mut results = pool.results().expect("results taken once");
//!
//! pool.submit(job).await?;
//! pool.stop().await;
//! while let Some(result) = results.recv().await {
//!     println!("{}: ok={}", result.job.shortcode, result.success);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::MediaNode;
use crate::error::{ErrorKind, ScrapeError};
use crate::http::HttpClient;
use crate::limiter::RateLimit;
use crate::storage::StorageManager;

/// Capability to fetch content bytes.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches the full body at `url`.
    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError>;
}

#[async_trait]
impl Downloader for HttpClient {
    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        HttpClient::download_bytes(self, url).await
    }
}

/// Capability to materialize content and answer duplicate checks.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Returns whether content for `shortcode` already exists.
    async fn is_downloaded(&self, shortcode: &str) -> bool;

    /// Saves content bytes and appends the derived metadata record,
    /// returning the materialized filename.
    async fn save_photo_with_metadata(
        &self,
        bytes: &[u8],
        shortcode: &str,
        node: &MediaNode,
    ) -> Result<String, ScrapeError>;
}

#[async_trait]
impl PhotoStore for StorageManager {
    async fn is_downloaded(&self, shortcode: &str) -> bool {
        StorageManager::is_downloaded(self, shortcode).await
    }

    async fn save_photo_with_metadata(
        &self,
        bytes: &[u8],
        shortcode: &str,
        node: &MediaNode,
    ) -> Result<String, ScrapeError> {
        StorageManager::save_photo_with_metadata(self, bytes, shortcode, node).await
    }
}

/// One unit of download work. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Direct URL to the content bytes.
    pub url: String,
    /// Content key.
    pub shortcode: String,
    /// Target handle, for logging.
    pub username: String,
    /// Timeline node snapshot for metadata derivation.
    pub node: MediaNode,
}

impl DownloadJob {
    /// Builds a job from a timeline node.
    #[must_use]
    pub fn from_node(node: &MediaNode, username: impl Into<String>) -> Self {
        Self {
            url: node.display_url.clone(),
            shortcode: node.shortcode.clone(),
            username: username.into(),
            node: node.clone(),
        }
    }
}

/// Outcome of one job. Every dequeued job produces exactly one.
#[derive(Debug)]
pub struct DownloadResult {
    /// The job this result belongs to.
    pub job: DownloadJob,
    /// Whether the content is on disk (freshly saved or already present).
    pub success: bool,
    /// The failure, when `success` is false.
    pub error: Option<ScrapeError>,
    /// Materialized filename, when `success` is true.
    pub filename: Option<String>,
    /// Bytes fetched over the network (0 for duplicates).
    pub bytes: u64,
    /// Wall-clock time from dequeue to emission.
    pub duration: Duration,
    /// True when the duplicate check short-circuited the download.
    pub skipped: bool,
}

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, not yet started.
    Created,
    /// Accepting submissions.
    Running,
    /// Intake closed, draining queued jobs.
    Stopping,
    /// All workers exited, result stream closed.
    Stopped,
}

/// Bounded pool of download workers.
pub struct WorkerPool {
    state: PoolState,
    worker_count: usize,
    downloader: Arc<dyn Downloader>,
    storage: Arc<dyn PhotoStore>,
    limiter: Arc<dyn RateLimit>,
    cancel: CancellationToken,
    job_tx: Option<mpsc::Sender<DownloadJob>>,
    result_rx: Option<mpsc::Receiver<DownloadResult>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("state", &self.state)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool of `worker_count` workers (raised to 1 if 0).
    #[must_use]
    pub fn new(
        worker_count: usize,
        downloader: Arc<dyn Downloader>,
        storage: Arc<dyn PhotoStore>,
        limiter: Arc<dyn RateLimit>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: PoolState::Created,
            worker_count: worker_count.max(1),
            downloader,
            storage,
            limiter,
            cancel,
            job_tx: None,
            result_rx: None,
            workers: Vec::new(),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawns the workers and opens the job queue. Idempotent only from
    /// `Created`; any other state is a no-op.
    #[instrument(skip(self), fields(workers = self.worker_count))]
    pub fn start(&mut self) {
        if self.state != PoolState::Created {
            return;
        }

        let (job_tx, job_rx) = mpsc::channel::<DownloadJob>(self.worker_count * 2);
        let (result_tx, result_rx) = mpsc::channel::<DownloadResult>(self.worker_count);
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker_id in 0..self.worker_count {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let downloader = Arc::clone(&self.downloader);
            let storage = Arc::clone(&self.storage);
            let limiter = Arc::clone(&self.limiter);
            let cancel = self.cancel.clone();
            self.workers.push(tokio::spawn(worker_loop(
                worker_id, jobs, results, downloader, storage, limiter, cancel,
            )));
        }
        // The pool keeps no result sender; the stream closes when the last
        // worker exits.
        drop(result_tx);

        self.job_tx = Some(job_tx);
        self.result_rx = Some(result_rx);
        self.state = PoolState::Running;
        debug!("worker pool started");
    }

    /// Takes the result stream. Yields `None` after the first call.
    pub fn results(&mut self) -> Option<mpsc::Receiver<DownloadResult>> {
        self.result_rx.take()
    }

    /// Submits a job, applying backpressure when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the pool is not running.
    pub async fn submit(&self, job: DownloadJob) -> Result<(), ScrapeError> {
        if self.state != PoolState::Running {
            return Err(ScrapeError::new(
                ErrorKind::Unknown,
                "worker pool is not accepting jobs",
            ));
        }
        let Some(tx) = self.job_tx.as_ref() else {
            return Err(ScrapeError::new(
                ErrorKind::Unknown,
                "worker pool is not accepting jobs",
            ));
        };
        tx.send(job).await.map_err(|_| {
            ScrapeError::new(ErrorKind::Unknown, "worker pool job queue closed")
        })
    }

    /// Closes intake, drains queued jobs, and waits for all workers.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) {
        match self.state {
            PoolState::Running => self.state = PoolState::Stopping,
            PoolState::Created => {
                self.state = PoolState::Stopped;
                return;
            }
            PoolState::Stopping | PoolState::Stopped => return,
        }

        // Closing the queue lets workers drain what is already buffered and
        // then observe the channel close.
        self.job_tx = None;

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }

        self.state = PoolState::Stopped;
        info!("worker pool stopped");
    }
}

/// Per-worker loop: dequeue, process, emit exactly one result per job.
async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<DownloadJob>>>,
    results: mpsc::Sender<DownloadResult>,
    downloader: Arc<dyn Downloader>,
    storage: Arc<dyn PhotoStore>,
    limiter: Arc<dyn RateLimit>,
    cancel: CancellationToken,
) {
    loop {
        // Hold the queue lock only for the dequeue itself.
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker_id, "job queue closed, worker exiting");
            break;
        };

        let started = Instant::now();

        // The already-dequeued job must still emit on cancellation; jobs left
        // in the queue never will.
        if cancel.is_cancelled() {
            let result = Outcome::failure(ScrapeError::canceled("worker cancelled"))
                .into_result(job, started.elapsed());
            let _ = results.send(result).await;
            debug!(worker_id, "cancelled, worker exiting");
            break;
        }

        // A panicking job must not take down the per-job result invariant.
        let outcome = std::panic::AssertUnwindSafe(process_job(
            &job, &*downloader, &*storage, &*limiter,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            warn!(worker_id, shortcode = %job.shortcode, "job panicked");
            Outcome::failure(ScrapeError::new(
                ErrorKind::Unknown,
                format!("download job for {} panicked", job.shortcode),
            ))
        });

        let result = outcome.into_result(job, started.elapsed());
        if results.send(result).await.is_err() {
            // Consumer is gone; nothing left to report to.
            debug!(worker_id, "result stream closed, worker exiting");
            break;
        }
    }
}

/// Intermediate job outcome, turned into a [`DownloadResult`] with timing.
enum Outcome {
    Saved { filename: String, bytes: u64 },
    AlreadyPresent { filename: String },
    Failed(ScrapeError),
}

impl Outcome {
    fn failure(error: ScrapeError) -> Self {
        Self::Failed(error)
    }

    fn into_result(self, job: DownloadJob, duration: Duration) -> DownloadResult {
        match self {
            Self::Saved { filename, bytes } => DownloadResult {
                job,
                success: true,
                error: None,
                filename: Some(filename),
                bytes,
                duration,
                skipped: false,
            },
            Self::AlreadyPresent { filename } => DownloadResult {
                job,
                success: true,
                error: None,
                filename: Some(filename),
                bytes: 0,
                duration,
                skipped: true,
            },
            Self::Failed(error) => DownloadResult {
                job,
                success: false,
                error: Some(error),
                filename: None,
                bytes: 0,
                duration,
                skipped: false,
            },
        }
    }
}

/// Single-path job processing: duplicate check, admission, download, save.
async fn process_job(
    job: &DownloadJob,
    downloader: &dyn Downloader,
    storage: &dyn PhotoStore,
    limiter: &dyn RateLimit,
) -> Outcome {
    if storage.is_downloaded(&job.shortcode).await {
        debug!(shortcode = %job.shortcode, "already on disk, skipping download");
        return Outcome::AlreadyPresent {
            filename: format!("{}.jpg", job.shortcode),
        };
    }

    if !limiter.allow() {
        if let Err(e) = limiter.wait().await {
            return Outcome::failure(e);
        }
    }

    let bytes = match downloader.download_bytes(&job.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(shortcode = %job.shortcode, error = %e, "download failed");
            return Outcome::failure(e);
        }
    };

    match storage
        .save_photo_with_metadata(&bytes, &job.shortcode, &job.node)
        .await
    {
        Ok(filename) => {
            debug!(
                shortcode = %job.shortcode,
                bytes = bytes.len(),
                "download complete"
            );
            Outcome::Saved {
                filename,
                bytes: bytes.len() as u64,
            }
        }
        Err(e) => {
            warn!(shortcode = %job.shortcode, error = %e, "save failed");
            Outcome::failure(e)
        }
    }
}
