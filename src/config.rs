//! Session configuration.
//!
//! The embedding layer (CLI flags, config files, env) produces one [`Config`]
//! and hands it to the scraper; the core neither reads files nor env vars for
//! configuration, except for the platform user-data fallback in the
//! checkpoint store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::ProviderEndpoints;
use crate::limiter::LimiterConfig;
use crate::retry::Backoff;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 5;

/// Default HTTP retry attempts per request.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default bounded outer retries per page fetch.
pub const DEFAULT_PAGE_RETRY_LIMIT: u32 = 3;

/// Session configuration for one scraper run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker pool size.
    pub workers: usize,
    /// Shared admission gate tuning.
    pub limiter: LimiterConfig,
    /// HTTP retry attempt ceiling per request (0 = unbounded).
    pub retry_max_attempts: u32,
    /// Backoff tuning for HTTP retries.
    pub backoff: Backoff,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Bounded outer retries per page when in-request retries are exhausted.
    pub page_retry_limit: u32,
    /// Fixed delay between outer page retries.
    pub page_retry_delay: Duration,
    /// Directory under which `<handle>_photos/` is created.
    pub output_base_dir: PathBuf,
    /// User-data root for checkpoints; `None` uses the platform default.
    pub data_dir: Option<PathBuf>,
    /// Provider URL construction.
    pub endpoints: ProviderEndpoints,
    /// Opaque session material forwarded as request headers.
    pub headers: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            limiter: LimiterConfig::SlidingWindow {
                max_requests: 100,
                window: Duration::from_secs(3600),
            },
            retry_max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: Backoff::by_error_kind(),
            connect_timeout: Duration::from_secs(crate::http::CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(crate::http::REQUEST_TIMEOUT_SECS),
            page_retry_limit: DEFAULT_PAGE_RETRY_LIMIT,
            page_retry_delay: Duration::from_secs(5),
            output_base_dir: PathBuf::from("."),
            data_dir: None,
            endpoints: ProviderEndpoints::default(),
            headers: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.workers >= 1);
        assert!(config.retry_max_attempts >= 1);
        assert!(config.page_retry_limit >= 1);
        assert!(config.headers.is_empty());
        assert!(config.data_dir.is_none());
    }
}
