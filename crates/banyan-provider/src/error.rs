use thiserror::Error;

/// A failed provider call.
///
/// `retryable` distinguishes transient faults (throttling, timeouts,
/// eventual-consistency reads) from permanent ones (validation failures,
/// missing permissions). The engine retries retryable errors with backoff;
/// a non-retryable error fails the node immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
  pub retryable: bool,
  pub message: String,
}

impl ProviderError {
  /// A transient failure worth retrying.
  pub fn retryable(message: impl Into<String>) -> Self {
    Self {
      retryable: true,
      message: message.into(),
    }
  }

  /// A permanent failure; the node fails without retries.
  pub fn fatal(message: impl Into<String>) -> Self {
    Self {
      retryable: false,
      message: message.into(),
    }
  }
}
