//! Retry policies and error reporters.
//!
//! A failed fetch is described by a [`TileProviderError`] and handed to the
//! layer's [`ErrorReporter`], which decides whether the same tile is fetched
//! again or marked `Failed`.
//!
//! # Example
//!
//! ```ignore
//! use globelayer::pipeline::{RetryPolicy, RetryPolicyErrorReporter};
//!
//! // Up to 3 attempts, 100ms then 200ms apart
//! let reporter = RetryPolicyErrorReporter::new(RetryPolicy::exponential(3));
//! layer.set_error_reporter(Box::new(reporter));
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FailureKind;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a tile fetch handles transient failures.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    #[default]
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ///
    /// The delay grows by `multiplier` after each failed attempt, up to
    /// `max_delay`.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier applied to delay after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum number of attempts (including initial)
    pub fn exponential(max_attempts: u32) -> Self {
        Self::exponential_from(max_attempts, Duration::from_millis(DEFAULT_INITIAL_DELAY_MS))
    }

    /// Exponential backoff starting at `initial_delay`.
    pub fn exponential_from(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Delay before retry number `attempt` (1-based), or `None` when the
    /// attempts are exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let delay =
                    Duration::from_millis(delay_ms.min(max_delay.as_millis() as f64) as u64);
                Some(delay.min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Structured description of a failed tile fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileProviderError {
    pub provider: String,
    pub x: u32,
    pub y: u32,
    pub level: u32,
    pub kind: FailureKind,
    pub message: String,
    /// Retries already made for this tile.
    pub times_retried: u32,
}

impl fmt::Display for TileProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to obtain image tile X: {} Y: {} Level: {} from {} ({}): {}",
            self.x, self.y, self.level, self.provider, self.kind, self.message
        )
    }
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Fetch the same tile again after `delay`.
    Retry { delay: Duration },
    /// Accept the failure; the imagery becomes `Failed`.
    GiveUp,
}

/// Receives fetch failures and decides whether to retry.
pub trait ErrorReporter: Send {
    fn report(&mut self, error: &TileProviderError) -> RetryDecision;

    /// Called after a successful fetch.
    fn report_success(&mut self) {}
}

/// Retries according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyErrorReporter {
    policy: RetryPolicy,
}

impl RetryPolicyErrorReporter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl ErrorReporter for RetryPolicyErrorReporter {
    fn report(&mut self, error: &TileProviderError) -> RetryDecision {
        match self.policy.delay_for_attempt(error.times_retried + 1) {
            Some(delay) => {
                debug!(
                    provider = %error.provider,
                    x = error.x,
                    y = error.y,
                    level = error.level,
                    attempt = error.times_retried + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying imagery request"
                );
                RetryDecision::Retry { delay }
            }
            None => RetryDecision::GiveUp,
        }
    }
}

/// Logs every failure and never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorReporter;

impl ErrorReporter for LoggingErrorReporter {
    fn report(&mut self, error: &TileProviderError) -> RetryDecision {
        warn!(
            provider = %error.provider,
            x = error.x,
            y = error.y,
            level = error.level,
            kind = %error.kind,
            "{}",
            error.message
        );
        RetryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(times_retried: u32) -> TileProviderError {
        TileProviderError {
            provider: "test".to_string(),
            x: 1,
            y: 2,
            level: 3,
            kind: FailureKind::NetworkFailure,
            message: "connection reset".to_string(),
            times_retried,
        }
    }

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_retry_policy_exponential() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_retry_policy_exponential_respects_max_delay() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert!(policy.delay_for_attempt(5).unwrap() <= Duration::from_secs(5));
    }

    #[test]
    fn test_policy_reporter_retries_then_gives_up() {
        let mut reporter = RetryPolicyErrorReporter::new(RetryPolicy::exponential(3));

        assert_eq!(
            reporter.report(&error(0)),
            RetryDecision::Retry {
                delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS)
            }
        );
        assert!(matches!(reporter.report(&error(1)), RetryDecision::Retry { .. }));
        assert_eq!(reporter.report(&error(2)), RetryDecision::GiveUp);
    }

    #[test]
    fn test_logging_reporter_never_retries() {
        let mut reporter = LoggingErrorReporter;
        assert_eq!(reporter.report(&error(0)), RetryDecision::GiveUp);
    }

    #[test]
    fn test_error_display() {
        let text = error(0).to_string();
        assert!(text.starts_with("Failed to obtain image tile X: 1 Y: 2 Level: 3"));
        assert!(text.contains("network failure"));
    }
}
