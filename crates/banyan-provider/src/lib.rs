//! Banyan Provider
//!
//! This crate defines the boundary between the engine and whatever actually
//! owns the resources - a cloud API client, a local process manager, or a
//! mock in tests.
//!
//! The [`Provider`] trait covers:
//! - deciding the operation for a node by diffing desired inputs against
//!   last-known state
//! - applying create/update/delete operations
//! - reading live state back
//!
//! Every call may fail with a [`ProviderError`] carrying a `retryable` flag;
//! the engine retries retryable failures according to a [`RetryPolicy`].

mod error;
mod retry;
mod types;

pub use error::ProviderError;
pub use retry::{RetryBackoff, RetryPolicy};
pub use types::{diff_by_inputs, OperationKind, ResourceOutputs, ResourceState};

use async_trait::async_trait;
use banyan_resource::Urn;

/// The engine's only boundary to real resource APIs.
///
/// Implementations must be safe to call concurrently; the engine dispatches
/// up to its concurrency limit of nodes at once against one provider.
#[async_trait]
pub trait Provider: Send + Sync {
  /// Decide which operation would converge the resource toward `desired`.
  ///
  /// `last_known` is the stored state from the previous run, if any.
  /// Providers that have no custom diffing can defer to [`diff_by_inputs`].
  async fn diff(
    &self,
    urn: &Urn,
    desired: &serde_json::Value,
    last_known: Option<&ResourceState>,
  ) -> Result<OperationKind, ProviderError>;

  /// Create the resource and return its resolved output attributes.
  async fn create(
    &self,
    urn: &Urn,
    inputs: &serde_json::Value,
  ) -> Result<ResourceOutputs, ProviderError>;

  /// Read the current live state, or `None` if the resource does not exist.
  async fn read(&self, urn: &Urn) -> Result<Option<ResourceState>, ProviderError>;

  /// Update the existing resource in place and return its new outputs.
  async fn update(
    &self,
    urn: &Urn,
    inputs: &serde_json::Value,
    last_known: &ResourceState,
  ) -> Result<ResourceOutputs, ProviderError>;

  /// Tear down the resource.
  async fn delete(&self, urn: &Urn, last_known: &ResourceState) -> Result<(), ProviderError>;
}
