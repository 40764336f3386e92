use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node during one execution.
///
/// Pending at creation, Ready once every dependency is Done, Running while
/// dispatched to the provider, then exactly one of Done, Failed, or Skipped.
/// Skipped marks transitive dependents of a failure and nodes never
/// dispatched after cancellation; a Skipped node is never sent to the
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeState {
  Pending = 0,
  Ready = 1,
  Running = 2,
  Done = 3,
  Failed = 4,
  Skipped = 5,
}

impl NodeState {
  pub fn is_terminal(self) -> bool {
    matches!(self, NodeState::Done | NodeState::Failed | NodeState::Skipped)
  }

  fn from_u8(raw: u8) -> NodeState {
    match raw {
      0 => NodeState::Pending,
      1 => NodeState::Ready,
      2 => NodeState::Running,
      3 => NodeState::Done,
      4 => NodeState::Failed,
      _ => NodeState::Skipped,
    }
  }
}

/// Per-node state cells, indexed by declaration order.
///
/// The state table is the only mutable state shared between the scheduler
/// and spawned node tasks. Every transition is a single compare-and-swap on
/// one node's cell; there is no broader lock to hold across nodes.
#[derive(Debug)]
pub struct StateTable {
  cells: Vec<AtomicU8>,
}

impl StateTable {
  /// Create a table with every node Pending.
  pub fn new(len: usize) -> Self {
    Self {
      cells: (0..len).map(|_| AtomicU8::new(NodeState::Pending as u8)).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.cells.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  pub fn get(&self, index: usize) -> NodeState {
    NodeState::from_u8(self.cells[index].load(Ordering::Acquire))
  }

  /// Atomically move a node from `from` to `to`.
  ///
  /// Returns the actual state on a lost race or an out-of-order call; the
  /// cell is left untouched in that case.
  pub fn transition(&self, index: usize, from: NodeState, to: NodeState) -> Result<(), NodeState> {
    self.cells[index]
      .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
      .map(|_| ())
      .map_err(NodeState::from_u8)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transitions_follow_the_lifecycle() {
    let table = StateTable::new(1);
    assert_eq!(table.get(0), NodeState::Pending);

    table.transition(0, NodeState::Pending, NodeState::Ready).unwrap();
    table.transition(0, NodeState::Ready, NodeState::Running).unwrap();
    table.transition(0, NodeState::Running, NodeState::Done).unwrap();
    assert_eq!(table.get(0), NodeState::Done);
    assert!(table.get(0).is_terminal());
  }

  #[test]
  fn stale_transition_reports_actual_state() {
    let table = StateTable::new(1);
    table.transition(0, NodeState::Pending, NodeState::Ready).unwrap();

    let actual = table
      .transition(0, NodeState::Pending, NodeState::Skipped)
      .unwrap_err();
    assert_eq!(actual, NodeState::Ready);
    assert_eq!(table.get(0), NodeState::Ready);
  }
}
