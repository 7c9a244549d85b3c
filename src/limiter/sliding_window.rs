//! Sliding window admission gate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::RateLimit;
use crate::error::ScrapeError;

/// Sliding window limiter: at most `max_requests` admissions inside any
/// trailing `window`.
///
/// State is the ordered sequence of admission timestamps; entries older than
/// the window are pruned before every decision. A window with
/// `max_requests == 0` never admits.
#[derive(Debug)]
pub struct SlidingWindow {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
    cancel: CancellationToken,
}

impl SlidingWindow {
    /// Creates a limiter admitting `max_requests` per trailing `window`.
    #[must_use]
    #[instrument(skip(cancel), fields(max_requests, window_ms = window.as_millis()))]
    pub fn new(max_requests: usize, window: Duration, cancel: CancellationToken) -> Self {
        debug!("creating sliding window limiter");
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::new()),
            cancel,
        }
    }

    /// Prunes expired timestamps and tries to admit. Returns the time until
    /// the oldest in-window admission expires when the window is full.
    fn try_admit(&self) -> Result<(), Duration> {
        let mut timestamps = self
            .timestamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let now = Instant::now();
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            return Ok(());
        }

        let until_exit = timestamps.front().map_or(self.window, |oldest| {
            self.window.saturating_sub(now.duration_since(*oldest))
        });
        // Zero-capacity windows have no oldest entry to expire; re-check at
        // window granularity so cancellation is still observed.
        Err(until_exit.max(Duration::from_millis(10)))
    }
}

#[async_trait]
impl RateLimit for SlidingWindow {
    fn allow(&self) -> bool {
        self.try_admit().is_ok()
    }

    async fn wait(&self) -> Result<(), ScrapeError> {
        loop {
            let until_exit = match self.try_admit() {
                Ok(()) => return Ok(()),
                Err(until_exit) => until_exit,
            };

            debug!(sleep_ms = until_exit.as_millis(), "sliding window full");
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(ScrapeError::canceled("rate limiter wait cancelled"));
                }
                () = tokio::time::sleep(until_exit) => {}
            }
        }
    }

    fn reset(&self) {
        self.timestamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn window(max: usize, window_ms: u64) -> SlidingWindow {
        SlidingWindow::new(
            max,
            Duration::from_millis(window_ms),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_allow_up_to_max_requests() {
        let limiter = window(2, 1000);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn test_allow_after_window_expiry() {
        tokio::time::pause();
        let limiter = window(1, 1000);

        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn test_zero_max_never_admits() {
        let limiter = window(0, 100);
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn test_wait_sleeps_until_oldest_exits() {
        tokio::time::pause();
        let limiter = window(1, 500);

        assert!(limiter.allow());

        let start = Instant::now();
        limiter.wait().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_wait_returns_canceled_on_cancellation() {
        let cancel = CancellationToken::new();
        let limiter = SlidingWindow::new(0, Duration::from_secs(60), cancel.clone());

        let wait = tokio::spawn(async move { limiter.wait().await });
        cancel.cancel();

        let result = wait.await.unwrap();
        assert_eq!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Canceled
        );
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let limiter = window(1, 60_000);
        assert!(limiter.allow());
        assert!(!limiter.allow());

        limiter.reset();
        assert!(limiter.allow());
    }
}
