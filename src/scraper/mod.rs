//! Top-level download session coordinator.
//!
//! One [`Scraper::run`] call harvests one target: it resolves the profile,
//! walks the timeline cursor, fans pages out to the worker pool, drains the
//! result stream on a separate task, and couples every step to the durable
//! checkpoint so an interrupted session resumes where it stopped.
//!
//! # Example
//!
//! ```no_run
//! use igscraper_core::{Config, RunOptions, Scraper};
//!
//! # async fn example() -> Result<(), igscraper_core::ScrapeError> {
//! let scraper = Scraper::new(Config::default());
//! let summary = scraper.run("alice", RunOptions::default()).await?;
//! println!("downloaded {} photos", summary.downloaded);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogClient, MediaPage, PageCursor};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::error::{ErrorKind, ScrapeError};
use crate::http::HttpClient;
use crate::limiter::RateLimit;
use crate::pool::{DownloadJob, DownloadResult, WorkerPool};
use crate::storage::StorageManager;

/// How an existing checkpoint is treated at session start.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Continue from an existing checkpoint.
    pub resume: bool,
    /// Discard any existing checkpoint and start over.
    pub force_restart: bool,
}

/// One per-item failure, for the end-of-session report.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Content key of the failed item.
    pub shortcode: String,
    /// The recorded failure.
    pub error: ScrapeError,
}

/// Outcome of a completed session.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Target handle.
    pub username: String,
    /// Resolved provider user ID.
    pub user_id: String,
    /// Pages fully submitted this run.
    pub pages_processed: u32,
    /// Jobs submitted to the pool this run.
    pub queued: u64,
    /// Fresh downloads completed this run.
    pub downloaded: u64,
    /// Items skipped because the content was already on disk or recorded.
    pub already_present: u64,
    /// Video nodes filtered out.
    pub videos_skipped: u64,
    /// Per-item failures this run.
    pub failed: u64,
    /// Detail for each failure.
    pub failures: Vec<FailureRecord>,
}

/// Download session coordinator for one target at a time.
#[derive(Debug)]
pub struct Scraper {
    config: Config,
    cancel: CancellationToken,
}

impl Scraper {
    /// Creates a scraper with a fresh cancellation token.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the session cancellation token, for signal handlers.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one download session for `handle`.
    ///
    /// On cancellation or a session-level failure the checkpoint is kept so a
    /// later `resume` run can continue; on clean completion it is deleted and
    /// the metadata artifact is written.
    ///
    /// # Errors
    ///
    /// `Auth`/`NotFound` from the profile lookup, `Parsing` for a malformed
    /// checkpoint, `Canceled` on cancellation, retryable kinds once the
    /// bounded outer page retries are exhausted, `Unknown` for internal
    /// failures (including refusing to clobber an existing checkpoint when
    /// `resume` was not requested).
    #[instrument(skip(self), fields(handle))]
    pub async fn run(&self, handle: &str, opts: RunOptions) -> Result<RunSummary, ScrapeError> {
        let store = Arc::new(match &self.config.data_dir {
            Some(dir) => CheckpointStore::with_base_dir(dir, handle),
            None => CheckpointStore::new(handle)?,
        });

        if opts.force_restart && store.exists() {
            info!("discarding existing checkpoint");
            store.delete().await?;
        }

        let mut checkpoint: Option<Checkpoint> = if store.exists() {
            if opts.resume {
                store.load().await?
            } else {
                return Err(ScrapeError::new(
                    ErrorKind::Unknown,
                    format!(
                        "a checkpoint exists for {handle}; resume to continue or force-restart to discard it"
                    ),
                ));
            }
        } else {
            None
        };

        let storage = Arc::new(StorageManager::new(&self.config.output_base_dir, handle)?);

        if let Some(cp) = checkpoint.as_mut() {
            reconcile_with_disk(cp, &storage, &store).await;
            storage
                .initialize_user_metadata(handle, &cp.user_id, cp.total_queued)
                .await;
            info!(
                page = cp.last_processed_page,
                recorded = cp.downloaded_photos.len(),
                "resuming from checkpoint"
            );
        }

        let http = Arc::new(HttpClient::with_config(
            self.cancel.clone(),
            self.config.connect_timeout,
            self.config.request_timeout,
            self.config.retry_max_attempts,
            self.config.backoff.clone(),
        )?);
        http.set_headers(self.config.headers.clone());
        let catalog = CatalogClient::new(Arc::clone(&http), self.config.endpoints.clone());

        let limiter: Arc<dyn RateLimit> = self.config.limiter.build(self.cancel.clone());

        let mut pool = WorkerPool::new(
            self.config.workers,
            Arc::clone(&http) as Arc<dyn crate::pool::Downloader>,
            Arc::clone(&storage) as Arc<dyn crate::pool::PhotoStore>,
            Arc::clone(&limiter),
            self.cancel.clone(),
        );
        pool.start();
        let Some(results) = pool.results() else {
            return Err(ScrapeError::new(
                ErrorKind::Unknown,
                "worker pool result stream unavailable",
            ));
        };

        let checkpoint_cell = Arc::new(Mutex::new(checkpoint));
        let consumer = tokio::spawn(consume_results(
            results,
            Arc::clone(&checkpoint_cell),
            Arc::clone(&store),
        ));

        let mut session = SessionProgress::from_checkpoint(&*checkpoint_cell.lock().await);
        let session_error = self
            .paginate(
                handle,
                &catalog,
                &storage,
                &store,
                &*limiter,
                &pool,
                &checkpoint_cell,
                &mut session,
            )
            .await
            .err();

        // Shutdown: drain in-flight work, then join the consumer.
        pool.stop().await;
        let report = match consumer.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "result consumer panicked");
                ConsumerReport::default()
            }
        };

        if session_error.is_none() {
            if let Err(e) = storage.save_user_metadata().await {
                warn!(error = %e, "failed to write metadata artifact");
            }
            if let Err(e) = store.delete().await {
                warn!(error = %e, "failed to delete checkpoint after clean completion");
            }
        }

        let summary = RunSummary {
            username: handle.to_string(),
            user_id: session.user_id.unwrap_or_default(),
            pages_processed: session.pages_processed,
            queued: session.queued,
            downloaded: report.downloaded,
            already_present: report.skipped + session.checkpoint_skips,
            videos_skipped: session.videos_skipped,
            failed: report.failed,
            failures: report.failures,
        };
        log_summary(&summary);

        match session_error {
            Some(err) => {
                warn!(kind = %err.kind(), error = %err, "session terminated");
                Err(err)
            }
            None => Ok(summary),
        }
    }

    /// Pagination main loop. Returns `Ok` when the timeline is exhausted.
    #[allow(clippy::too_many_arguments)]
    async fn paginate(
        &self,
        handle: &str,
        catalog: &CatalogClient,
        storage: &Arc<StorageManager>,
        store: &Arc<CheckpointStore>,
        limiter: &dyn RateLimit,
        pool: &WorkerPool,
        checkpoint_cell: &Arc<Mutex<Option<Checkpoint>>>,
        session: &mut SessionProgress,
    ) -> Result<(), ScrapeError> {
        let mut page_retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ScrapeError::canceled("session cancelled"));
            }

            if !limiter.allow() {
                info!("rate limit reached, cooling down before next catalog request");
                limiter.wait().await?;
            }

            let fetched = self
                .fetch_next_window(handle, catalog, storage, store, checkpoint_cell, session)
                .await;

            let page = match fetched {
                Ok(page) => {
                    page_retries = 0;
                    page
                }
                Err(err) if err.kind() == ErrorKind::Canceled => return Err(err),
                Err(err)
                    if err.is_retryable() && page_retries < self.config.page_retry_limit =>
                {
                    page_retries += 1;
                    warn!(
                        error = %err,
                        attempt = page_retries,
                        limit = self.config.page_retry_limit,
                        delay_ms = self.config.page_retry_delay.as_millis(),
                        "page fetch failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            return Err(ScrapeError::canceled("page retry cancelled"));
                        }
                        () = tokio::time::sleep(self.config.page_retry_delay) => {}
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let submitted = self
                .submit_page(handle, &page, pool, checkpoint_cell, session)
                .await?;

            session.pages_processed += 1;
            session.queued += submitted;
            {
                let mut guard = checkpoint_cell.lock().await;
                if let Some(cp) = guard.as_mut() {
                    cp.total_queued += submitted;
                    if let Err(e) = store
                        .update_progress(cp, page.cursor.token(), session.pages_processed)
                        .await
                    {
                        warn!(error = %e, "failed to persist page progress");
                    }
                }
            }

            debug!(
                page = session.pages_processed,
                submitted,
                has_next = page.cursor.token().is_some(),
                "page submitted"
            );

            match page.cursor {
                PageCursor::Next(next) => session.cursor = Some(next),
                PageCursor::Terminal => return Ok(()),
            }
        }
    }

    /// Fetches the next timeline window: a profile lookup on first contact,
    /// a cursor fetch afterwards.
    async fn fetch_next_window(
        &self,
        handle: &str,
        catalog: &CatalogClient,
        storage: &Arc<StorageManager>,
        store: &Arc<CheckpointStore>,
        checkpoint_cell: &Arc<Mutex<Option<Checkpoint>>>,
        session: &mut SessionProgress,
    ) -> Result<MediaPage, ScrapeError> {
        if let Some(user_id) = session.user_id.clone() {
            return catalog
                .fetch_page(&user_id, session.cursor.as_deref())
                .await;
        }

        let profile = catalog.fetch_profile(handle).await?;
        session.user_id = Some(profile.user_id.clone());
        storage
            .initialize_user_metadata(handle, &profile.user_id, profile.media_count)
            .await;
        let checkpoint = store.create(handle, &profile.user_id).await?;
        *checkpoint_cell.lock().await = Some(checkpoint);
        Ok(profile.first_page)
    }

    /// Filters a page and submits the remaining nodes as jobs.
    async fn submit_page(
        &self,
        handle: &str,
        page: &MediaPage,
        pool: &WorkerPool,
        checkpoint_cell: &Arc<Mutex<Option<Checkpoint>>>,
        session: &mut SessionProgress,
    ) -> Result<u64, ScrapeError> {
        let mut submitted = 0u64;
        for node in &page.nodes {
            if node.is_video {
                session.videos_skipped += 1;
                debug!(shortcode = %node.shortcode, "skipping video");
                continue;
            }
            let recorded = checkpoint_cell
                .lock()
                .await
                .as_ref()
                .is_some_and(|cp| cp.contains(&node.shortcode));
            if recorded {
                session.checkpoint_skips += 1;
                continue;
            }
            pool.submit(DownloadJob::from_node(node, handle)).await?;
            submitted += 1;
        }
        Ok(submitted)
    }
}

/// Mutable per-run bookkeeping for the pagination loop.
#[derive(Debug, Default)]
struct SessionProgress {
    user_id: Option<String>,
    cursor: Option<String>,
    pages_processed: u32,
    queued: u64,
    videos_skipped: u64,
    checkpoint_skips: u64,
}

impl SessionProgress {
    fn from_checkpoint(checkpoint: &Option<Checkpoint>) -> Self {
        match checkpoint {
            Some(cp) => Self {
                user_id: Some(cp.user_id.clone()),
                cursor: cp.cursor().map(str::to_string),
                pages_processed: cp.last_processed_page,
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

/// What the result consumer accumulated while draining the stream.
#[derive(Debug, Default)]
struct ConsumerReport {
    downloaded: u64,
    skipped: u64,
    failed: u64,
    failures: Vec<FailureRecord>,
}

/// Drains the pool's result stream, recording successes in the checkpoint.
///
/// The consumer never stalls: checkpoint save failures are logged and
/// swallowed.
async fn consume_results(
    mut results: mpsc::Receiver<DownloadResult>,
    checkpoint_cell: Arc<Mutex<Option<Checkpoint>>>,
    store: Arc<CheckpointStore>,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();

    while let Some(result) = results.recv().await {
        if result.success {
            if result.skipped {
                report.skipped += 1;
                debug!(shortcode = %result.job.shortcode, "already present");
            } else {
                report.downloaded += 1;
                info!(
                    shortcode = %result.job.shortcode,
                    bytes = result.bytes,
                    elapsed_ms = result.duration.as_millis(),
                    "photo downloaded"
                );
            }

            let filename = result
                .filename
                .unwrap_or_else(|| format!("{}.jpg", result.job.shortcode));
            let mut guard = checkpoint_cell.lock().await;
            if let Some(cp) = guard.as_mut() {
                if let Err(e) = store
                    .record_download(cp, &result.job.shortcode, &filename)
                    .await
                {
                    warn!(
                        shortcode = %result.job.shortcode,
                        error = %e,
                        "failed to record download in checkpoint"
                    );
                }
            }
        } else {
            report.failed += 1;
            let error = result
                .error
                .unwrap_or_else(|| ScrapeError::new(ErrorKind::Unknown, "missing result error"));
            warn!(
                shortcode = %result.job.shortcode,
                kind = %error.kind(),
                error = %error,
                "download failed"
            );
            report.failures.push(FailureRecord {
                shortcode: result.job.shortcode.clone(),
                error,
            });
        }
    }

    report
}

/// Drops checkpoint entries whose files are missing; the disk is the ground
/// truth on resume.
async fn reconcile_with_disk(
    checkpoint: &mut Checkpoint,
    storage: &Arc<StorageManager>,
    store: &Arc<CheckpointStore>,
) {
    let recorded: Vec<String> = checkpoint.downloaded_photos.keys().cloned().collect();
    let mut dropped = 0u64;
    for shortcode in recorded {
        if !storage.is_downloaded(&shortcode).await {
            checkpoint.downloaded_photos.remove(&shortcode);
            dropped += 1;
        }
    }
    if dropped > 0 {
        checkpoint.total_downloaded = checkpoint.total_downloaded.saturating_sub(dropped);
        warn!(dropped, "checkpoint entries missing on disk, will re-download");
        if let Err(e) = store.save(checkpoint).await {
            warn!(error = %e, "failed to persist reconciled checkpoint");
        }
    }
}

/// End-of-session report: one info line plus one warn per failure.
fn log_summary(summary: &RunSummary) {
    info!(
        username = %summary.username,
        pages = summary.pages_processed,
        queued = summary.queued,
        downloaded = summary.downloaded,
        already_present = summary.already_present,
        videos_skipped = summary.videos_skipped,
        failed = summary.failed,
        "session summary"
    );
    for failure in &summary.failures {
        warn!(
            shortcode = %failure.shortcode,
            kind = %failure.error.kind(),
            error = %failure.error,
            "unresolved download failure"
        );
    }
}
