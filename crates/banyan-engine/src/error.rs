use banyan_graph::GraphError;
use banyan_provider::ProviderError;
use banyan_store::StoreError;
use thiserror::Error;

/// Errors that abort a run or a plan outright.
///
/// Per-node provider failures are not here: those are scoped to the node,
/// recorded in the [`crate::ExecutionReport`], and never abort the run.
#[derive(Debug, Error)]
pub enum EngineError {
  /// Graph construction failed; nothing was scheduled.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// A provider call failed while computing a plan preview.
  #[error("provider error: {0}")]
  Provider(#[from] ProviderError),

  /// The state store failed while computing a plan preview.
  #[error("state store error: {0}")]
  Store(#[from] StoreError),

  /// An internal invariant was violated (double output resolution, an
  /// impossible state transition, a panicked node task). Always a bug.
  #[error("engine invariant violated: {0}")]
  Invariant(String),
}
