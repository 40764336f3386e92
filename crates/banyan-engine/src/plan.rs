use banyan_provider::OperationKind;
use banyan_resource::{NodeId, Urn};
use serde::{Deserialize, Serialize};

/// One step of a plan preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
  pub node_id: NodeId,
  pub urn: Urn,
  pub operation: OperationKind,
}

/// A diff-only preview of what a run would do.
///
/// Steps are listed in the same deterministic order the executor would
/// dispatch them. Nothing is mutated while planning; references to outputs
/// that do not exist yet are previewed from stored state where possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub steps: Vec<PlannedStep>,
  /// Stored urns that pruning would delete.
  pub prune: Vec<Urn>,
}

impl Plan {
  /// Number of steps that would touch the external system.
  pub fn changes(&self) -> usize {
    self
      .steps
      .iter()
      .filter(|s| s.operation.is_mutation())
      .count()
  }
}
