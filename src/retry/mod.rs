//! Retry engine with error-classified backoff.
//!
//! The [`Retrier`] executes an async operation under a retry policy: failures
//! whose [`ErrorKind`](crate::error::ErrorKind) is retryable are re-attempted
//! after a backoff delay, everything else surfaces immediately. Sleeps race
//! against the session cancellation token; a cancelled sleep surfaces a
//! `Canceled` error and is never retried.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use igscraper_core::retry::{Backoff, Retrier};
//!
//! # async fn example() -> Result<(), igscraper_core::ScrapeError> {
//! let retrier = Retrier::new(3, Backoff::by_error_kind(), CancellationToken::new());
//! let body = retrier
//!     .run(|| async { fetch_once().await })
//!     .await?;
//! # Ok(())
//! # }
//! # async fn fetch_once() -> Result<Vec<u8>, igscraper_core::ScrapeError> { Ok(vec![]) }
//! ```

mod backoff;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{ErrorKind, ScrapeError};

pub use backoff::{
    BackoffStrategy, ConstantBackoff, ErrorKindBackoff, ExponentialBackoff, LinearBackoff,
};

/// Maximum `Retry-After` value honored before capping (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Observer invoked before each retry sleep with (attempt, error, delay).
pub type OnRetry = Arc<dyn Fn(u32, &ScrapeError, Duration) + Send + Sync>;

/// Classification predicate deciding whether an error is worth retrying.
pub type ShouldRetry = Arc<dyn Fn(&ScrapeError) -> bool + Send + Sync>;

/// The backoff source a [`Retrier`] draws delays from.
///
/// `ByErrorKind` switches the active strategy per observed failure kind; the
/// fixed variant applies one strategy regardless of kind.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// One strategy for every failure kind.
    Fixed(Arc<dyn BackoffStrategy>),
    /// Per-kind dispatch to tuned sub-strategies.
    ByErrorKind(ErrorKindBackoff),
}

impl Backoff {
    /// Default per-kind dispatched backoff.
    #[must_use]
    pub fn by_error_kind() -> Self {
        Self::ByErrorKind(ErrorKindBackoff::default())
    }

    /// A single exponential strategy applied to all kinds.
    #[must_use]
    pub fn exponential(strategy: ExponentialBackoff) -> Self {
        Self::Fixed(Arc::new(strategy))
    }

    /// A constant delay applied to all kinds.
    #[must_use]
    pub fn constant(delay: Duration) -> Self {
        Self::Fixed(Arc::new(ConstantBackoff::new(delay)))
    }

    fn delay_for(&self, kind: ErrorKind, attempt: u32) -> Duration {
        match self {
            Self::Fixed(strategy) => strategy.delay_for(attempt),
            Self::ByErrorKind(dispatch) => dispatch.delay_for_kind(kind, attempt),
        }
    }
}

/// Executes operations under a retry policy.
#[derive(Clone)]
pub struct Retrier {
    max_attempts: u32,
    backoff: Backoff,
    should_retry: ShouldRetry,
    on_retry: Option<OnRetry>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Retrier {
    /// Creates a retrier.
    ///
    /// `max_attempts` counts the initial attempt; 0 means unbounded. The
    /// default classification retries exactly the retryable kinds (Network,
    /// RateLimit, ServerError).
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff, cancel: CancellationToken) -> Self {
        Self {
            max_attempts,
            backoff,
            should_retry: Arc::new(ScrapeError::is_retryable),
            on_retry: None,
            cancel,
        }
    }

    /// Replaces the classification predicate.
    #[must_use]
    pub fn with_should_retry(mut self, predicate: ShouldRetry) -> Self {
        self.should_retry = predicate;
        self
    }

    /// Installs an observer invoked before each retry sleep.
    #[must_use]
    pub fn with_on_retry(mut self, observer: OnRetry) -> Self {
        self.on_retry = Some(observer);
        self
    }

    /// Returns the configured attempt ceiling (0 = unbounded).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds, a terminal error occurs, or attempts are
    /// exhausted.
    ///
    /// A server-supplied `Retry-After` on a rate-limit error takes precedence
    /// over the computed backoff for that attempt.
    ///
    /// # Errors
    ///
    /// Returns the last observed error on exhaustion, the first terminal
    /// error, or a `Canceled` error if the cancellation token fires.
    #[instrument(level = "debug", skip_all, fields(max_attempts = self.max_attempts))]
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(ScrapeError::canceled("operation cancelled before attempt"));
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Canceled {
                return Err(err);
            }
            if !(self.should_retry)(&err) {
                debug!(kind = %err.kind(), attempt, "terminal error, not retrying");
                return Err(err);
            }
            if self.max_attempts != 0 && attempt >= self.max_attempts {
                warn!(
                    kind = %err.kind(),
                    attempt,
                    max_attempts = self.max_attempts,
                    "retry attempts exhausted"
                );
                return Err(err);
            }

            let backoff_delay = self.backoff.delay_for(err.kind(), attempt);
            let delay = server_mandated_delay(&err).unwrap_or(backoff_delay);

            debug!(
                kind = %err.kind(),
                attempt,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                error = %err,
                "retrying after backoff"
            );
            if let Some(observer) = &self.on_retry {
                observer(attempt, &err, delay);
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(ScrapeError::canceled("retry sleep cancelled"));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Extracts a server-mandated delay from a rate-limit error's `Retry-After`.
fn server_mandated_delay(err: &ScrapeError) -> Option<Duration> {
    if err.kind() != ErrorKind::RateLimit {
        return None;
    }
    parse_retry_after(err.retry_after()?)
}

/// Parses a `Retry-After` header value into a duration.
///
/// Supports both RFC 7231 forms: integer seconds and HTTP-date. Values beyond
/// one hour are capped; negative or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        return match datetime.duration_since(now) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date in the past: admit immediately.
            Err(_) => Some(Duration::ZERO),
        };
    }

    None
}
