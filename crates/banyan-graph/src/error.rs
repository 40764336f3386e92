use banyan_resource::NodeId;
use thiserror::Error;

/// Errors that can occur while building a graph from declared specs.
///
/// All of these are fatal: the builder returns no partial graph and the
/// engine schedules nothing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  /// Two specs declared the same name.
  #[error("duplicate resource name: {0}")]
  DuplicateNode(NodeId),

  /// A reference, parent, or explicit dependency points at a name that no
  /// spec declares.
  #[error("resource '{from}' references unknown resource '{to}'")]
  UnknownReference { from: NodeId, to: NodeId },

  /// The dependency relation is not acyclic.
  #[error("cyclic dependency: {}", format_cycle(.cycle))]
  CyclicDependency {
    /// The nodes on the cycle, in edge order; the first node closes it.
    cycle: Vec<NodeId>,
  },
}

fn format_cycle(cycle: &[NodeId]) -> String {
  let mut names: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
  if let Some(first) = names.first().copied() {
    names.push(first);
  }
  names.join(" -> ")
}
