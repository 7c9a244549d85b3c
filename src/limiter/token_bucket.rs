//! Token bucket admission gate.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::RateLimit;
use crate::error::ScrapeError;

/// Token bucket with full-bucket refill.
///
/// Holds `capacity` tokens; whenever a full refill period has elapsed since
/// the last refill, the bucket snaps back to `capacity`. A bucket with
/// capacity 0 never admits.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    period: Duration,
    state: Mutex<BucketState>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket that admits `capacity` requests per `period`.
    #[must_use]
    #[instrument(skip(cancel), fields(capacity, period_ms = period.as_millis()))]
    pub fn new(capacity: u32, period: Duration, cancel: CancellationToken) -> Self {
        debug!("creating token bucket limiter");
        Self {
            capacity,
            period,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            cancel,
        }
    }

    /// Refills the bucket when the period has elapsed, then tries to take one
    /// token. Returns the residual sleep needed when the bucket is empty.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let now = Instant::now();
        if now.duration_since(state.last_refill) >= self.period {
            state.tokens = self.capacity;
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            Ok(())
        } else if self.capacity == 0 {
            // Never admits; sleep a full period between cancellation checks.
            Err(self.period.max(Duration::from_millis(10)))
        } else {
            Err(self
                .period
                .saturating_sub(now.duration_since(state.last_refill)))
        }
    }
}

#[async_trait]
impl RateLimit for TokenBucket {
    fn allow(&self) -> bool {
        self.try_take().is_ok()
    }

    async fn wait(&self) -> Result<(), ScrapeError> {
        loop {
            let residual = match self.try_take() {
                Ok(_) => return Ok(()),
                Err(residual) => residual,
            };

            debug!(sleep_ms = residual.as_millis(), "token bucket exhausted");
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(ScrapeError::canceled("rate limiter wait cancelled"));
                }
                () = tokio::time::sleep(residual) => {}
            }
        }
    }

    fn reset(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bucket(capacity: u32, period_ms: u64) -> TokenBucket {
        TokenBucket::new(
            capacity,
            Duration::from_millis(period_ms),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_allow_consumes_capacity() {
        let limiter = bucket(3, 1000);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn test_allow_refills_after_period() {
        tokio::time::pause();
        let limiter = bucket(1, 1000);

        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn test_capacity_zero_never_admits() {
        let limiter = bucket(0, 100);
        assert!(!limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn test_wait_sleeps_until_refill() {
        tokio::time::pause();
        let limiter = bucket(1, 1000);

        assert!(limiter.allow());

        let start = Instant::now();
        limiter.wait().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_wait_returns_canceled_on_cancellation() {
        let cancel = CancellationToken::new();
        let limiter = TokenBucket::new(0, Duration::from_secs(60), cancel.clone());

        let wait = tokio::spawn(async move { limiter.wait().await });
        cancel.cancel();

        let result = wait.await.unwrap();
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Canceled
        );
    }

    #[tokio::test]
    async fn test_reset_restores_full_capacity() {
        let limiter = bucket(2, 60_000);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        limiter.reset();
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn test_concurrent_allow_admits_exactly_capacity() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let limiter = Arc::new(bucket(50, 60_000));
        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(tokio::spawn(async move {
                if limiter.allow() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
    }
}
