//! Admission control for outbound requests.
//!
//! All workers and the pagination loop compete for the same limiter, so the
//! implementations keep their critical sections short: state lives under a
//! `std::sync::Mutex` and sleeping always happens with the lock released.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use igscraper_core::limiter::{RateLimit, TokenBucket};
//!
//! # async fn example() -> Result<(), igscraper_core::ScrapeError> {
//! let limiter = Arc::new(TokenBucket::new(10, Duration::from_secs(60), CancellationToken::new()));
//! if !limiter.allow() {
//!     limiter.wait().await?;
//! }
//! // ... make the request
//! # Ok(())
//! # }
//! ```

mod sliding_window;
mod token_bucket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ScrapeError;

pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// Minimal capability required from an admission gate.
///
/// `allow` and `reset` never fail; `wait` fails only with a `Canceled` error
/// when the session's cancellation token fires mid-sleep.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Non-blocking admission check; consumes one unit when available.
    fn allow(&self) -> bool;

    /// Blocks until one unit is consumable, then consumes it.
    ///
    /// # Errors
    ///
    /// Returns a `Canceled` error if the cancellation token fires while
    /// waiting.
    async fn wait(&self) -> Result<(), ScrapeError>;

    /// Returns the limiter to its initial state.
    fn reset(&self);
}

/// Which admission strategy a session uses, with its tuning.
#[derive(Debug, Clone)]
pub enum LimiterConfig {
    /// Fixed capacity refilled to full every period.
    TokenBucket {
        /// Units available per period.
        capacity: u32,
        /// Refill period.
        period: Duration,
    },
    /// At most `max_requests` admissions inside any trailing window.
    SlidingWindow {
        /// Maximum admissions per window.
        max_requests: usize,
        /// Trailing window length.
        window: Duration,
    },
}

impl LimiterConfig {
    /// Builds the configured limiter, sharing the session cancellation token.
    #[must_use]
    pub fn build(&self, cancel: CancellationToken) -> Arc<dyn RateLimit> {
        match *self {
            Self::TokenBucket { capacity, period } => {
                Arc::new(TokenBucket::new(capacity, period, cancel))
            }
            Self::SlidingWindow {
                max_requests,
                window,
            } => Arc::new(SlidingWindow::new(max_requests, window, cancel)),
        }
    }
}
