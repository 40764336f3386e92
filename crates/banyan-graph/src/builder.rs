use std::collections::{BTreeSet, HashMap};

use banyan_resource::{NodeId, ResourceSpec};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::Node;

/// Builds a validated [`Graph`] from an ordered sequence of specs.
pub struct GraphBuilder;

impl GraphBuilder {
  /// Assemble and validate the dependency graph.
  ///
  /// Dependency edges are the union of:
  /// - output references embedded anywhere in each spec's inputs
  /// - the parent edge, if declared
  /// - explicit `depends_on` entries
  ///
  /// Fails with [`GraphError::DuplicateNode`] on a repeated name,
  /// [`GraphError::UnknownReference`] when an edge points at a name no spec
  /// declares, and [`GraphError::CyclicDependency`] (naming the cycle) when
  /// the dependency relation is not acyclic. No partial graph is returned.
  pub fn build(specs: impl IntoIterator<Item = ResourceSpec>) -> Result<Graph, GraphError> {
    let specs: Vec<ResourceSpec> = specs.into_iter().collect();

    let mut index: HashMap<NodeId, usize> = HashMap::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
      if index.insert(spec.id(), i).is_some() {
        return Err(GraphError::DuplicateNode(spec.id()));
      }
    }

    let mut dependency_sets: Vec<BTreeSet<NodeId>> = Vec::with_capacity(specs.len());
    for spec in &specs {
      let id = spec.id();
      let mut dependencies = BTreeSet::new();

      for reference in spec.references() {
        if !index.contains_key(&reference.node) {
          return Err(GraphError::UnknownReference {
            from: id.clone(),
            to: reference.node.clone(),
          });
        }
        dependencies.insert(reference.node.clone());
      }

      if let Some(parent) = &spec.parent {
        if !index.contains_key(parent) {
          return Err(GraphError::UnknownReference {
            from: id.clone(),
            to: parent.clone(),
          });
        }
        dependencies.insert(parent.clone());
      }

      for dependency in &spec.depends_on {
        if !index.contains_key(dependency) {
          return Err(GraphError::UnknownReference {
            from: id.clone(),
            to: dependency.clone(),
          });
        }
        dependencies.insert(dependency.clone());
      }

      dependency_sets.push(dependencies);
    }

    let nodes: Vec<Node> = specs
      .into_iter()
      .zip(dependency_sets)
      .enumerate()
      .map(|(i, (spec, dependencies))| Node {
        id: spec.id(),
        index: i,
        spec,
        dependencies,
      })
      .collect();

    detect_cycle(&nodes, &index)?;

    Ok(Graph::new(nodes, index))
  }
}

/// DFS coloring: 0 = white (unvisited), 1 = gray (in progress), 2 = black
/// (done). A gray-to-gray back edge is a cycle; the path stack names it.
fn detect_cycle(nodes: &[Node], index: &HashMap<NodeId, usize>) -> Result<(), GraphError> {
  let adjacency: Vec<Vec<usize>> = nodes
    .iter()
    .map(|node| node.dependencies.iter().map(|dep| index[dep]).collect())
    .collect();

  fn dfs(
    node: usize,
    adjacency: &[Vec<usize>],
    color: &mut [u8],
    path: &mut Vec<usize>,
  ) -> Option<Vec<usize>> {
    color[node] = 1;
    path.push(node);

    for &next in &adjacency[node] {
      match color[next] {
        1 => {
          // Back edge: the cycle is the path from `next` onwards.
          let start = path.iter().position(|&n| n == next).unwrap_or(0);
          return Some(path[start..].to_vec());
        }
        0 => {
          if let Some(cycle) = dfs(next, adjacency, color, path) {
            return Some(cycle);
          }
        }
        _ => {}
      }
    }

    path.pop();
    color[node] = 2;
    None
  }

  let mut color = vec![0u8; nodes.len()];
  let mut path = Vec::new();

  for start in 0..nodes.len() {
    if color[start] == 0 {
      if let Some(cycle) = dfs(start, &adjacency, &mut color, &mut path) {
        return Err(GraphError::CyclicDependency {
          cycle: cycle.into_iter().map(|i| nodes[i].id.clone()).collect(),
        });
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use banyan_resource::Value;
  use serde_json::json;

  fn bucket() -> ResourceSpec {
    ResourceSpec::builder("aws:s3:Bucket", "bucket")
      .input("force_destroy", true)
      .build()
  }

  fn policy() -> ResourceSpec {
    ResourceSpec::builder("aws:s3:BucketPolicy", "policy")
      .input("bucket", Value::reference("bucket", "bucket"))
      .build()
  }

  #[test]
  fn infers_edges_from_references() {
    let graph = GraphBuilder::build([bucket(), policy()]).unwrap();

    assert_eq!(graph.len(), 2);
    let policy_index = graph.index_of(&NodeId::new("policy")).unwrap();
    assert_eq!(graph.dependencies(policy_index), &[0]);
    assert_eq!(graph.dependents(0), &[policy_index]);
    assert_eq!(graph.entry_points(), vec![0]);
  }

  #[test]
  fn parent_and_explicit_dependencies_become_edges() {
    let child = ResourceSpec::builder("aws:s3:BucketPolicy", "child")
      .parent("bucket")
      .build();
    let follower = ResourceSpec::builder("custom:Package", "follower")
      .depends_on("child")
      .build();

    let graph = GraphBuilder::build([bucket(), child, follower]).unwrap();

    assert_eq!(graph.dependencies(1), &[0]);
    assert_eq!(graph.dependencies(2), &[1]);
  }

  #[test]
  fn duplicate_names_are_rejected() {
    let err = GraphBuilder::build([bucket(), bucket()]).unwrap_err();
    assert_eq!(err, GraphError::DuplicateNode(NodeId::new("bucket")));
  }

  #[test]
  fn unknown_references_are_rejected() {
    let orphan = ResourceSpec::builder("aws:s3:BucketPolicy", "orphan")
      .input("bucket", Value::reference("missing", "bucket"))
      .build();

    let err = GraphBuilder::build([orphan]).unwrap_err();
    assert_eq!(
      err,
      GraphError::UnknownReference {
        from: NodeId::new("orphan"),
        to: NodeId::new("missing"),
      }
    );
  }

  #[test]
  fn unknown_parent_is_rejected() {
    let child = ResourceSpec::builder("custom:Package", "child")
      .parent("missing")
      .build();

    let err = GraphBuilder::build([child]).unwrap_err();
    assert!(matches!(err, GraphError::UnknownReference { .. }));
  }

  #[test]
  fn two_node_cycle_is_named() {
    let a = ResourceSpec::builder("custom:A", "a")
      .input("x", Value::reference("b", "out"))
      .build();
    let b = ResourceSpec::builder("custom:B", "b")
      .input("y", Value::reference("a", "out"))
      .build();

    let err = GraphBuilder::build([a, b]).unwrap_err();
    match err {
      GraphError::CyclicDependency { cycle } => {
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&NodeId::new("a")));
        assert!(cycle.contains(&NodeId::new("b")));
      }
      other => panic!("expected cycle error, got {other:?}"),
    }
  }

  #[test]
  fn self_reference_is_a_cycle() {
    let narcissus = ResourceSpec::builder("custom:A", "narcissus")
      .input("me", Value::reference("narcissus", "out"))
      .build();

    let err = GraphBuilder::build([narcissus]).unwrap_err();
    match err {
      GraphError::CyclicDependency { cycle } => {
        assert_eq!(cycle, vec![NodeId::new("narcissus")]);
      }
      other => panic!("expected cycle error, got {other:?}"),
    }
  }

  #[test]
  fn diamond_is_not_a_cycle() {
    let root = bucket();
    let left = ResourceSpec::builder("custom:L", "left")
      .input("b", Value::reference("bucket", "bucket"))
      .build();
    let right = ResourceSpec::builder("custom:R", "right")
      .input("b", Value::reference("bucket", "bucket"))
      .build();
    let tip = ResourceSpec::builder("custom:T", "tip")
      .input("l", Value::reference("left", "out"))
      .input("r", Value::reference("right", "out"))
      .input("extra", Value::literal(json!({"deep": [1, 2]})))
      .build();

    let graph = GraphBuilder::build([root, left, right, tip]).unwrap();
    assert_eq!(graph.dependencies(3), &[1, 2]);
    assert_eq!(graph.dependents(0), &[1, 2]);
  }
}
