use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, Urn};
use crate::value::{OutputRef, Value};

/// An immutable description of one declared resource.
///
/// Specs are created at declaration time and never mutated afterwards; the
/// graph builder and the engine only read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
  /// Provider-scoped type token, e.g. `"aws:s3:Bucket"`.
  pub type_token: String,
  /// Logical name, unique within the declaration.
  pub name: String,
  #[serde(default)]
  pub inputs: BTreeMap<String, Value>,
  /// Optional parent resource; adds a dependency edge to the parent.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent: Option<NodeId>,
  /// Explicit dependencies beyond those inferred from input references.
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub depends_on: BTreeSet<NodeId>,
}

impl ResourceSpec {
  pub fn builder(type_token: impl Into<String>, name: impl Into<String>) -> ResourceSpecBuilder {
    ResourceSpecBuilder {
      type_token: type_token.into(),
      name: name.into(),
      inputs: BTreeMap::new(),
      parent: None,
      depends_on: BTreeSet::new(),
    }
  }

  /// The node id this spec declares.
  pub fn id(&self) -> NodeId {
    NodeId::new(&self.name)
  }

  /// The stable cross-run identifier used as the state store key.
  pub fn urn(&self) -> Urn {
    Urn::new(&self.type_token, &self.name)
  }

  /// Every output reference embedded in this spec's inputs, in key order.
  pub fn references(&self) -> Vec<&OutputRef> {
    let mut refs = Vec::new();
    for value in self.inputs.values() {
      refs.extend(value.references());
    }
    refs
  }
}

/// Builder for [`ResourceSpec`].
#[derive(Debug, Clone)]
pub struct ResourceSpecBuilder {
  type_token: String,
  name: String,
  inputs: BTreeMap<String, Value>,
  parent: Option<NodeId>,
  depends_on: BTreeSet<NodeId>,
}

impl ResourceSpecBuilder {
  pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.inputs.insert(key.into(), value.into());
    self
  }

  pub fn parent(mut self, parent: impl Into<NodeId>) -> Self {
    self.parent = Some(parent.into());
    self
  }

  pub fn depends_on(mut self, dependency: impl Into<NodeId>) -> Self {
    self.depends_on.insert(dependency.into());
    self
  }

  pub fn build(self) -> ResourceSpec {
    ResourceSpec {
      type_token: self.type_token,
      name: self.name,
      inputs: self.inputs,
      parent: self.parent,
      depends_on: self.depends_on,
    }
  }
}
