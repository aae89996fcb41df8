//! Retry policy with exponential backoff
//!
//! [`RetryPolicy`] is pure configuration: it computes the delay schedule and
//! classifies failures, but never sleeps. The downloader owns the waiting.
//!
//! # Example
//!
//! ```
//! use scrape_toolkit::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(4, Duration::from_millis(100), 2.0, Duration::from_millis(300))
//!     .unwrap();
//!
//! assert_eq!(policy.delay(1), Duration::from_millis(100));
//! assert_eq!(policy.delay(2), Duration::from_millis(200));
//! assert_eq!(policy.delay(3), Duration::from_millis(300)); // capped
//! ```

use crate::config::duration_ms;
use crate::error::{Error, Result, TransferError};
use crate::types::FailureKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for failures that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx) should return `true`.
/// Permanent failures (4xx, disk full, bad locator) should return `false`.
pub trait IsRetryable {
    /// Returns true if the failure is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FailureKind {
    fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::Network => true,
            // Request timeout, rate limiting, and server-side errors
            FailureKind::Status(code) => *code == 408 || *code == 429 || (500..600).contains(code),
            // A short body is a dropped connection in disguise
            FailureKind::ContentLengthMismatch => true,
            FailureKind::InsufficientSpace
            | FailureKind::Io
            | FailureKind::InvalidSource
            | FailureKind::Cancelled => false,
        }
    }
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Predicate deciding whether a failure kind is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(FailureKind) -> bool + Send + Sync>;

/// Retry configuration and backoff schedule
///
/// `delay(n) = min(max_delay, base_delay * backoff_multiplier^(n-1))`
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of transfer attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_ms")]
    pub base_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,

    /// Stretch each sleep by a random 0-100% (default: false)
    ///
    /// Only affects [`RetryPolicy::sleep_duration`]; [`RetryPolicy::delay`] stays deterministic.
    #[serde(default)]
    pub jitter: bool,

    /// Custom retryable classification; `None` uses [`IsRetryable`] for [`FailureKind`]
    #[serde(skip)]
    pub retryable_conditions: Option<RetryPredicate>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retryable_conditions", &self.retryable_conditions.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
            retryable_conditions: None,
        }
    }
}

impl RetryPolicy {
    /// Build and validate a policy
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any value is out of range (see [`RetryPolicy::validate`]).
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self> {
        let policy = Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay,
            jitter: false,
            retryable_conditions: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Replace the retryable classification
    pub fn with_retryable_conditions<F>(mut self, predicate: F) -> Self
    where
        F: Fn(FailureKind) -> bool + Send + Sync + 'static,
    {
        self.retryable_conditions = Some(Arc::new(predicate));
        self
    }

    /// Enable or disable jitter on sleeps
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check that the policy can produce a sane schedule
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "backoff_multiplier must be a finite value >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::config(
                "retry.base_delay",
                format!(
                    "base_delay ({:?}) must not exceed max_delay ({:?})",
                    self.base_delay, self.max_delay
                ),
            ));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next one
    ///
    /// `attempt = 0` is treated as 1. The result never exceeds `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();

        if base == 0.0 {
            return Duration::ZERO;
        }

        let raw = base * self.backoff_multiplier.powi(exponent);
        if !raw.is_finite() || raw >= cap {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(raw).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Full delay schedule, one entry per retry (`max_attempts - 1` entries)
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.delay(n)).collect()
    }

    /// The duration actually slept after attempt `attempt`, with jitter if enabled
    pub fn sleep_duration(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter { add_jitter(delay) } else { delay }
    }

    /// Whether a failure of this kind should be retried
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        match &self.retryable_conditions {
            Some(predicate) => predicate(kind),
            None => kind.is_retryable(),
        }
    }

    /// Whether another attempt is allowed after `attempt` failed with `kind`
    pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
        attempt < self.max_attempts && self.is_retryable(kind)
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}
