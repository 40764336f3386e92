use std::collections::HashMap;

use banyan_resource::NodeId;

use crate::node::Node;

/// A validated, acyclic dependency graph ready for execution.
///
/// Nodes are stored in declaration order; adjacency is index-based so the
/// scheduler can key per-node bookkeeping (state cells, pending-dependency
/// counts, output tables) by position.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Nodes in declaration order.
  nodes: Vec<Node>,
  /// Node id -> declaration index.
  index: HashMap<NodeId, usize>,
  /// index -> indices of nodes that depend on it (downstream).
  dependents: Vec<Vec<usize>>,
  /// index -> indices of nodes it depends on (upstream).
  dependencies: Vec<Vec<usize>>,
}

impl Graph {
  /// Assemble a graph from validated parts. Only the builder calls this;
  /// edges are assumed to reference existing nodes and contain no cycle.
  pub(crate) fn new(nodes: Vec<Node>, index: HashMap<NodeId, usize>) -> Self {
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for node in &nodes {
      for dep in &node.dependencies {
        let dep_index = index[dep];
        dependencies[node.index].push(dep_index);
        dependents[dep_index].push(node.index);
      }
    }

    for list in dependents.iter_mut().chain(dependencies.iter_mut()) {
      list.sort_unstable();
    }

    Self {
      nodes,
      index,
      dependents,
      dependencies,
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All nodes, in declaration order.
  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn node(&self, index: usize) -> &Node {
    &self.nodes[index]
  }

  pub fn get(&self, id: &NodeId) -> Option<&Node> {
    self.index.get(id).map(|&i| &self.nodes[i])
  }

  pub fn index_of(&self, id: &NodeId) -> Option<usize> {
    self.index.get(id).copied()
  }

  /// Indices of nodes that depend on the given node.
  pub fn dependents(&self, index: usize) -> &[usize] {
    &self.dependents[index]
  }

  /// Indices of nodes the given node depends on.
  pub fn dependencies(&self, index: usize) -> &[usize] {
    &self.dependencies[index]
  }

  /// Indices of nodes with no dependencies, in declaration order.
  pub fn entry_points(&self) -> Vec<usize> {
    self
      .nodes
      .iter()
      .filter(|n| n.dependencies.is_empty())
      .map(|n| n.index)
      .collect()
  }
}
