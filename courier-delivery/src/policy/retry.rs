//! Retry policy for delivery attempts.
//!
//! Per record the state machine is:
//!
//! ```text
//! queued → in-flight → succeeded
//!                    → queued (transient failure, attempts left)
//!                    → abandoned (permanent failure, or attempts exhausted)
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{transport::Outcome, types::AbandonCause};

/// Reason recorded when the attempt budget runs out.
pub const RETRIES_EXHAUSTED: &str = "retries exhausted";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    ///
    /// Default: 5
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled for every later one.
    ///
    /// The delay before attempt `n + 1` is `base * 2^(n - 1)`.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Upper bound for the backoff delay.
    ///
    /// Default: 300000 ms (5 minutes)
    #[serde(default = "defaults::max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Delays are randomised within ±`retry_jitter_factor` so a relay outage
    /// does not produce synchronised retry bursts.
    ///
    /// Clamped to `0.0..=0.3`: below 1/3 a jittered delay can never reach the
    /// smallest jittered value of the doubled delay after it, so successive
    /// delays keep increasing until the cap.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_ms: defaults::base_retry_delay_ms(),
            max_retry_delay_ms: defaults::max_retry_delay_ms(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

/// What to do with a record after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The relay accepted the message.
    Complete,
    /// Requeue after `delay`.
    Retry { delay: Duration, reason: String },
    /// Give up; the record is terminal.
    Abandon { cause: AbandonCause, reason: String },
}

impl RetryDecision {
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    /// Delay before the next attempt; zero unless retrying.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        match self {
            Self::Retry { delay, .. } => *delay,
            _ => Duration::ZERO,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Complete => "delivered",
            Self::Retry { reason, .. } | Self::Abandon { reason, .. } => reason,
        }
    }
}

impl RetryPolicy {
    /// Decide the next step after attempt number `attempt` (1-based) ended with `outcome`.
    #[must_use]
    pub fn decide(&self, outcome: &Outcome, attempt: u32) -> RetryDecision {
        match outcome {
            Outcome::Delivered { .. } => RetryDecision::Complete,
            Outcome::PermanentFailure { reason, .. } => RetryDecision::Abandon {
                cause: AbandonCause::PermanentFailure,
                reason: format!("permanent failure: {reason}"),
            },
            Outcome::TransientFailure { .. } if !self.should_retry(attempt) => {
                RetryDecision::Abandon {
                    cause: AbandonCause::RetriesExhausted,
                    reason: RETRIES_EXHAUSTED.to_string(),
                }
            }
            Outcome::TransientFailure { reason, .. } => RetryDecision::Retry {
                delay: self.backoff(attempt),
                reason: format!(
                    "transient failure on attempt {attempt}/{}: {reason}",
                    self.max_attempts
                ),
            },
        }
    }

    /// Whether another attempt is allowed after `attempt_count` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Jittered delay to wait after attempt number `attempt` failed.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        jitter(self.base_delay(attempt), self.retry_jitter_factor)
    }

    /// `base * 2^(attempt - 1)`, capped at the maximum delay, without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_retry_delay_ms
        } else {
            self.base_retry_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(self.max_retry_delay_ms)
        };

        Duration::from_millis(delay)
    }
}

/// Largest usable jitter factor; see [`RetryPolicy::retry_jitter_factor`].
pub const MAX_JITTER_FACTOR: f64 = 0.3;

fn jitter(delay: Duration, factor: f64) -> Duration {
    let factor = if factor.is_finite() {
        factor.clamp(0.0, MAX_JITTER_FACTOR)
    } else {
        0.0
    };
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }

    let range = delay.as_secs_f64() * factor;
    let offset: f64 = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_retry_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_retry_delay_ms() -> u64 {
        300_000
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.1
    }
}
