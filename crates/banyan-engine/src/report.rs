use banyan_graph::NodeState;
use banyan_provider::OperationKind;
use banyan_resource::{NodeId, Urn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal record for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
  pub node_id: NodeId,
  pub urn: Urn,
  pub state: NodeState,
  /// The operation the provider chose, if diffing got that far.
  pub operation: Option<OperationKind>,
  /// Provider call attempts, including the initial one. Zero when the node
  /// never reached the provider.
  pub attempts: u32,
  pub error: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// A failed prune deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneError {
  /// The urn being pruned; `None` when listing the store itself failed.
  pub urn: Option<Urn>,
  pub message: String,
}

/// Aggregate result of one execution.
///
/// The engine processes every reachable node and reports them all; partial
/// failure shows up here rather than as an early return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
  /// Unique id for this execution.
  pub execution_id: String,
  /// One outcome per node, in declaration order.
  pub outcomes: Vec<NodeOutcome>,
  /// Urns deleted by pruning.
  pub pruned: Vec<Urn>,
  pub prune_errors: Vec<PruneError>,
  /// Whether cancellation stopped dispatch before the graph was exhausted.
  pub cancelled: bool,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
  /// A run converged iff nothing failed and dispatch was not cut short.
  pub fn succeeded(&self) -> bool {
    !self.cancelled
      && self.prune_errors.is_empty()
      && self.outcomes.iter().all(|o| o.state != NodeState::Failed)
  }

  pub fn outcome(&self, node_id: &NodeId) -> Option<&NodeOutcome> {
    self.outcomes.iter().find(|o| &o.node_id == node_id)
  }
}
