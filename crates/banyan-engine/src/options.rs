use banyan_provider::RetryPolicy;
use tokio_util::sync::CancellationToken;

/// Default bound on concurrently dispatched provider operations.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;

/// Options for one execution.
#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Maximum nodes in flight at once. Clamped to at least 1.
  pub concurrency_limit: usize,
  /// Retry policy applied to every retryable provider failure.
  pub retry: RetryPolicy,
  /// Delete stored resources that are no longer declared, after a fully
  /// successful walk.
  pub prune: bool,
  /// Cancelling stops dispatch of new nodes; in-flight provider calls run
  /// to completion and already-Done nodes are not rolled back.
  pub cancel: CancellationToken,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
      retry: RetryPolicy::default(),
      prune: false,
      cancel: CancellationToken::new(),
    }
  }
}
