use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// A reference to another resource's not-yet-known output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
  /// The resource that produces the attribute.
  pub node: NodeId,
  /// The output field on that resource, e.g. `"bucket"`.
  pub field: String,
}

impl OutputRef {
  pub fn new(node: impl Into<NodeId>, field: impl Into<String>) -> Self {
    Self {
      node: node.into(),
      field: field.into(),
    }
  }
}

/// A declared input value.
///
/// Inputs form a tree: literals and references at the leaves, objects and
/// lists above them. References may appear at any depth; each one adds a
/// dependency edge from the declaring resource to the referenced resource
/// when the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
  /// A plain JSON value, passed through to the provider as-is.
  Literal(serde_json::Value),
  /// A deferred reference, substituted once the referenced resource is done.
  Reference(OutputRef),
  Object(BTreeMap<String, Value>),
  List(Vec<Value>),
}

impl Value {
  pub fn literal(value: impl Into<serde_json::Value>) -> Self {
    Value::Literal(value.into())
  }

  pub fn reference(node: impl Into<NodeId>, field: impl Into<String>) -> Self {
    Value::Reference(OutputRef::new(node, field))
  }

  /// Collect every [`OutputRef`] embedded in this value, depth-first.
  ///
  /// Order is deterministic: document order for lists, key order for
  /// objects.
  pub fn references(&self) -> Vec<&OutputRef> {
    let mut refs = Vec::new();
    self.collect_references(&mut refs);
    refs
  }

  fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
    match self {
      Value::Literal(_) => {}
      Value::Reference(r) => out.push(r),
      Value::Object(fields) => {
        for value in fields.values() {
          value.collect_references(out);
        }
      }
      Value::List(items) => {
        for value in items {
          value.collect_references(out);
        }
      }
    }
  }
}

impl From<serde_json::Value> for Value {
  fn from(value: serde_json::Value) -> Self {
    Value::Literal(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::Literal(serde_json::Value::String(value.to_string()))
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Literal(serde_json::Value::Bool(value))
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::Literal(serde_json::Value::Number(value.into()))
  }
}

impl From<OutputRef> for Value {
  fn from(r: OutputRef) -> Self {
    Value::Reference(r)
  }
}
