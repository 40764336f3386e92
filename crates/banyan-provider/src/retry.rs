use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the delay curve between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  Exponential,
}

/// Retry policy for retryable provider errors.
///
/// `max_attempts` counts the initial call: a policy with `max_attempts: 4`
/// performs at most one call plus three retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: RetryBackoff,
  pub initial_delay: Duration,
  /// Cap applied to every computed delay.
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: RetryBackoff::Exponential,
      initial_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay before the given retry, where `retry` is 1 for the first retry.
  ///
  /// Constant: `initial`; linear: `initial * retry`; exponential:
  /// `initial * 2^(retry - 1)`. Every delay is capped at `max_delay`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let retry = retry.max(1);
    let delay = match self.backoff {
      RetryBackoff::Constant => self.initial_delay,
      RetryBackoff::Linear => self.initial_delay.saturating_mul(retry),
      RetryBackoff::Exponential => {
        let factor = 2u32.saturating_pow(retry - 1);
        self.initial_delay.saturating_mul(factor)
      }
    };
    delay.min(self.max_delay)
  }
}
