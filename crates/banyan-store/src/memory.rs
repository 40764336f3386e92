use std::collections::BTreeMap;

use async_trait::async_trait;
use banyan_provider::ResourceState;
use banyan_resource::Urn;
use tokio::sync::RwLock;

use crate::{StateStore, StoreError};

/// In-process state store.
///
/// Holds states in a map behind an async RwLock. Nothing survives the
/// process; use [`crate::SqliteStore`] for durable state.
#[derive(Debug, Default)]
pub struct MemoryStore {
  states: RwLock<BTreeMap<Urn, ResourceState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed the store with existing states, e.g. for tests.
  pub fn with_states(states: impl IntoIterator<Item = ResourceState>) -> Self {
    Self {
      states: RwLock::new(
        states
          .into_iter()
          .map(|state| (state.urn.clone(), state))
          .collect(),
      ),
    }
  }
}

#[async_trait]
impl StateStore for MemoryStore {
  async fn load(&self, urn: &Urn) -> Result<Option<ResourceState>, StoreError> {
    Ok(self.states.read().await.get(urn).cloned())
  }

  async fn save(&self, state: &ResourceState) -> Result<(), StoreError> {
    self
      .states
      .write()
      .await
      .insert(state.urn.clone(), state.clone());
    Ok(())
  }

  async fn remove(&self, urn: &Urn) -> Result<(), StoreError> {
    self.states.write().await.remove(urn);
    Ok(())
  }

  async fn list(&self) -> Result<Vec<ResourceState>, StoreError> {
    Ok(self.states.read().await.values().cloned().collect())
  }
}
