use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of a declared resource, unique within a single declaration.
///
/// Node ids name resources while a deployment is being assembled and
/// executed. For a stable cross-run identity, see [`Urn`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for NodeId {
  fn from(id: &str) -> Self {
    Self(id.to_string())
  }
}

impl From<String> for NodeId {
  fn from(id: String) -> Self {
    Self(id)
  }
}

/// Globally unique resource identifier, stable across runs.
///
/// Urns key the state store: a resource declared under the same type token
/// and name in two consecutive runs maps to the same stored state, which is
/// what makes diffing against last-known state possible.
///
/// Format: `urn:{type_token}::{name}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
  /// Build the urn for a resource of the given type and name.
  pub fn new(type_token: &str, name: &str) -> Self {
    Self(format!("urn:{}::{}", type_token, name))
  }

  /// Wrap an already-formatted urn, e.g. one read back from the state store.
  pub fn parse(urn: impl Into<String>) -> Self {
    Self(urn.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Urn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
