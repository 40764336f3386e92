//! Banyan - a declarative resource graph engine.
//!
//! A deployment is an ordered sequence of [`ResourceSpec`]s. Banyan builds a
//! dependency DAG from them (references to other resources' outputs, parent
//! edges, explicit `depends_on`), then converges external state toward the
//! declaration through a [`Provider`]: diffing each resource against its
//! last-known state, dispatching create/update/delete operations in
//! dependency order with bounded parallelism, and feeding resolved outputs
//! forward into dependent resources' inputs.
//!
//! Failures are isolated: a failed resource skips its transitive dependents
//! and every other subtree still converges. The result is an aggregate
//! [`ExecutionReport`].
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use banyan::{run, MemoryStore, ResourceSpec, RunOptions, Value};
//!
//! let bucket = ResourceSpec::builder("aws:s3:Bucket", "server-bucket")
//!     .input("force_destroy", true)
//!     .build();
//!
//! let policy = ResourceSpec::builder("aws:s3:BucketPolicy", "bucket-policy")
//!     .input("bucket", Value::reference("server-bucket", "bucket"))
//!     .parent("server-bucket")
//!     .build();
//!
//! let store = Arc::new(MemoryStore::new());
//! let report = run([bucket, policy], provider, store, RunOptions::default()).await?;
//! assert!(report.succeeded());
//! ```

use std::sync::Arc;

pub use banyan_engine::{
  EngineError, ExecutionReport, Executor, NodeOutcome, Output, OutputError, Plan, PlannedStep,
  PruneError, RunOptions, Wait,
};
pub use banyan_graph::{Graph, GraphBuilder, GraphError, Node, NodeState, StateTable};
pub use banyan_provider::{
  diff_by_inputs, OperationKind, Provider, ProviderError, ResourceOutputs, ResourceState,
  RetryBackoff, RetryPolicy,
};
pub use banyan_resource::{NodeId, OutputRef, ResourceSpec, ResourceSpecBuilder, Urn, Value};
pub use banyan_store::{MemoryStore, SqliteStore, StateStore, StoreError};

/// Build the dependency graph from `specs` and converge every resource.
///
/// Graph construction errors (duplicates, unknown references, cycles) abort
/// before anything is scheduled. Per-resource provider failures do not:
/// they are recorded in the returned [`ExecutionReport`].
pub async fn run(
  specs: impl IntoIterator<Item = ResourceSpec>,
  provider: Arc<dyn Provider>,
  store: Arc<dyn StateStore>,
  options: RunOptions,
) -> Result<ExecutionReport, EngineError> {
  let graph = GraphBuilder::build(specs)?;
  Executor::new(provider, store).run(graph, options).await
}

/// Preview the operations [`run`] would perform, without mutating anything.
pub async fn plan(
  specs: impl IntoIterator<Item = ResourceSpec>,
  provider: Arc<dyn Provider>,
  store: Arc<dyn StateStore>,
) -> Result<Plan, EngineError> {
  let graph = GraphBuilder::build(specs)?;
  Executor::new(provider, store).plan(&graph).await
}
