use std::collections::BTreeSet;

use banyan_resource::{NodeId, ResourceSpec, Urn};
use serde::{Deserialize, Serialize};

/// A vertex in the dependency graph: one declared resource plus its
/// resolved dependency set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: NodeId,
  /// Position in the declaration order. Ties among simultaneously-ready
  /// nodes are broken by this index, which makes dispatch deterministic.
  pub index: usize,
  pub spec: ResourceSpec,
  /// Union of inferred reference edges, the parent edge, and explicit
  /// `depends_on` entries.
  pub dependencies: BTreeSet<NodeId>,
}

impl Node {
  pub fn urn(&self) -> Urn {
    self.spec.urn()
  }
}
