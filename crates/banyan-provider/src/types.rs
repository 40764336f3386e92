use banyan_resource::Urn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolved output attributes of a resource after a successful operation.
pub type ResourceOutputs = serde_json::Map<String, serde_json::Value>;

/// The operation chosen for a node after diffing desired inputs against
/// last-known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
  Noop,
}

impl OperationKind {
  /// Whether this operation touches the external system.
  pub fn is_mutation(self) -> bool {
    !matches!(self, OperationKind::Noop)
  }
}

/// Last-known state of one resource, as persisted by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
  pub urn: Urn,
  pub type_token: String,
  /// The fully resolved input document at the time of the last apply.
  pub inputs: serde_json::Value,
  /// The provider's output attributes from the last apply.
  pub outputs: serde_json::Value,
  pub updated_at: DateTime<Utc>,
}

impl ResourceState {
  /// Look up one output field, if the provider returned it.
  pub fn output(&self, field: &str) -> Option<&serde_json::Value> {
    self.outputs.get(field)
  }
}

/// The documented default diff: no last-known state means Create, a changed
/// input document means Update, anything else is a Noop.
///
/// Update-vs-replace decisions are provider policy; providers with replace
/// semantics implement their own `diff`.
pub fn diff_by_inputs(
  desired: &serde_json::Value,
  last_known: Option<&ResourceState>,
) -> OperationKind {
  match last_known {
    None => OperationKind::Create,
    Some(state) if state.inputs != *desired => OperationKind::Update,
    Some(_) => OperationKind::Noop,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn state(inputs: serde_json::Value) -> ResourceState {
    ResourceState {
      urn: Urn::new("test:Thing", "thing"),
      type_token: "test:Thing".to_string(),
      inputs,
      outputs: json!({}),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn missing_state_means_create() {
    assert_eq!(diff_by_inputs(&json!({"a": 1}), None), OperationKind::Create);
  }

  #[test]
  fn changed_inputs_mean_update() {
    let last = state(json!({"a": 1}));
    assert_eq!(
      diff_by_inputs(&json!({"a": 2}), Some(&last)),
      OperationKind::Update
    );
  }

  #[test]
  fn unchanged_inputs_mean_noop() {
    let last = state(json!({"a": 1}));
    assert_eq!(
      diff_by_inputs(&json!({"a": 1}), Some(&last)),
      OperationKind::Noop
    );
  }
}
