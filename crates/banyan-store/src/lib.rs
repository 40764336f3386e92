//! Banyan Store
//!
//! This crate provides the state store trait and implementations for
//! last-known resource state. The engine loads stored state before diffing
//! and saves it after every successful operation, keyed by [`Urn`] so state
//! survives across runs.
//!
//! Implementations:
//! - [`MemoryStore`] - in-process map, the default for tests and ephemeral
//!   runs
//! - [`SqliteStore`] - durable store backed by SQLite

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use banyan_provider::ResourceState;
use banyan_resource::Urn;

/// Error type for state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A stored state document could not be encoded or decoded.
  #[error("state serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Persistence for last-known resource state across runs.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Load the stored state for a urn, if any.
  async fn load(&self, urn: &Urn) -> Result<Option<ResourceState>, StoreError>;

  /// Save state after a successful create or update.
  async fn save(&self, state: &ResourceState) -> Result<(), StoreError>;

  /// Remove stored state after a delete. Removing an absent urn is a no-op.
  async fn remove(&self, urn: &Urn) -> Result<(), StoreError>;

  /// Every stored state, ordered by urn.
  async fn list(&self) -> Result<Vec<ResourceState>, StoreError>;
}
