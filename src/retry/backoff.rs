//! Backoff strategies for the retry engine.
//!
//! Each strategy computes the delay before attempt `k + 1` given that attempt
//! `k` (1-indexed) just failed. Jittered strategies perturb the computed delay
//! by a uniform ±fraction to avoid thundering-herd retries.

use std::time::Duration;

use rand::Rng;

use crate::error::ErrorKind;

/// Minimal capability required from a backoff strategy.
pub trait BackoffStrategy: Send + Sync + std::fmt::Debug {
    /// Delay before the attempt following failed attempt `attempt` (1-indexed).
    fn delay_for(&self, attempt: u32) -> Duration;

    /// Returns the strategy to its initial state. Stateless strategies are a
    /// no-op.
    fn reset(&self) {}
}

/// Applies uniform ±`fraction` jitter to a delay, clamping at zero.
fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let millis = delay.as_millis() as f64;
    let factor = rand::thread_rng().gen_range(-fraction..=fraction);
    let jittered = millis + millis * factor;
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Exponential backoff: `min(max, base * multiplier^(k-1))`, jittered.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_fraction: f64,
}

impl ExponentialBackoff {
    /// Creates an exponential strategy.
    #[must_use]
    pub fn new(base: Duration, max: Duration, multiplier: f64, jitter_fraction: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            jitter_fraction,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(32), 2.0, 0.25)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.base.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max.as_millis() as f64);
        apply_jitter(Duration::from_millis(capped as u64), self.jitter_fraction)
    }
}

/// Linear backoff: `min(max, base + increment * (k-1))`, jittered.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max: Duration,
    increment: Duration,
    jitter_fraction: f64,
}

impl LinearBackoff {
    /// Creates a linear strategy.
    #[must_use]
    pub fn new(base: Duration, max: Duration, increment: Duration, jitter_fraction: f64) -> Self {
        Self {
            base,
            max,
            increment,
            jitter_fraction,
        }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let raw = self.base + self.increment * steps;
        let capped = raw.min(self.max);
        apply_jitter(capped, self.jitter_fraction)
    }
}

/// Constant backoff: the same delay for every attempt, no jitter.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    /// Creates a constant strategy.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for ConstantBackoff {
    fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Per-error-kind dispatch to tuned sub-strategies.
///
/// Network failures back off aggressively (short base, fast growth), rate
/// limits slowest with the longest ceiling, server errors moderately;
/// everything else uses the default curve.
#[derive(Debug, Clone)]
pub struct ErrorKindBackoff {
    network: ExponentialBackoff,
    rate_limit: ExponentialBackoff,
    server_error: ExponentialBackoff,
    default: ExponentialBackoff,
}

impl ErrorKindBackoff {
    /// Creates the dispatcher from explicitly tuned sub-strategies.
    #[must_use]
    pub fn new(
        network: ExponentialBackoff,
        rate_limit: ExponentialBackoff,
        server_error: ExponentialBackoff,
        default: ExponentialBackoff,
    ) -> Self {
        Self {
            network,
            rate_limit,
            server_error,
            default,
        }
    }

    /// Delay for the attempt following a failure of the given kind.
    #[must_use]
    pub fn delay_for_kind(&self, kind: ErrorKind, attempt: u32) -> Duration {
        self.strategy_for(kind).delay_for(attempt)
    }

    fn strategy_for(&self, kind: ErrorKind) -> &ExponentialBackoff {
        match kind {
            ErrorKind::Network => &self.network,
            ErrorKind::RateLimit => &self.rate_limit,
            ErrorKind::ServerError => &self.server_error,
            _ => &self.default,
        }
    }
}

impl Default for ErrorKindBackoff {
    fn default() -> Self {
        Self {
            network: ExponentialBackoff::new(
                Duration::from_millis(500),
                Duration::from_secs(15),
                2.0,
                0.25,
            ),
            rate_limit: ExponentialBackoff::new(
                Duration::from_secs(5),
                Duration::from_secs(300),
                3.0,
                0.25,
            ),
            server_error: ExponentialBackoff::new(
                Duration::from_secs(2),
                Duration::from_secs(60),
                2.0,
                0.25,
            ),
            default: ExponentialBackoff::default(),
        }
    }
}

impl BackoffStrategy for ErrorKindBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.default.delay_for(attempt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Exponential Tests ====================

    #[test]
    fn test_exponential_doubles_per_attempt() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(32),
            2.0,
            0.0,
        );
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_respects_max() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
            0.0,
        );
        assert_eq!(backoff.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_jitter_within_bounds() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(4),
            Duration::from_secs(32),
            2.0,
            0.25,
        );
        for _ in 0..100 {
            let delay = backoff.delay_for(1);
            assert!(delay >= Duration::from_secs(3), "too small: {delay:?}");
            assert!(delay <= Duration::from_secs(5), "too large: {delay:?}");
        }
    }

    // ==================== Linear Tests ====================

    #[test]
    fn test_linear_adds_increment_per_attempt() {
        let backoff = LinearBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_secs(2),
            0.0,
        );
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(3));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn test_linear_respects_max() {
        let backoff = LinearBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(2),
            0.0,
        );
        assert_eq!(backoff.delay_for(10), Duration::from_secs(4));
    }

    // ==================== Constant Tests ====================

    #[test]
    fn test_constant_same_delay_every_attempt() {
        let backoff = ConstantBackoff::new(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(7), Duration::from_millis(250));
    }

    // ==================== ErrorKindBackoff Tests ====================

    #[test]
    fn test_error_kind_dispatch_rate_limit_slowest() {
        let backoff = ErrorKindBackoff::default();
        let network = backoff.delay_for_kind(ErrorKind::Network, 1);
        let rate_limit = backoff.delay_for_kind(ErrorKind::RateLimit, 1);
        assert!(
            rate_limit > network,
            "rate limit delay {rate_limit:?} should exceed network {network:?}"
        );
    }

    #[test]
    fn test_error_kind_dispatch_unclassified_uses_default() {
        let constant = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            1.0,
            0.0,
        );
        let backoff = ErrorKindBackoff::new(
            constant.clone(),
            constant.clone(),
            constant.clone(),
            ExponentialBackoff::new(Duration::from_secs(9), Duration::from_secs(9), 1.0, 0.0),
        );
        assert_eq!(
            backoff.delay_for_kind(ErrorKind::Unknown, 1),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(32),
            2.0,
            0.0,
        );
        assert_eq!(backoff.delay_for(2), backoff.delay_for(2));
    }
}
