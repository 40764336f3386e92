//! Integration tests for the executor using a recording mock provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use banyan_engine::{Executor, RunOptions};
use banyan_graph::{GraphBuilder, NodeState};
use banyan_provider::{
  diff_by_inputs, OperationKind, Provider, ProviderError, ResourceOutputs, ResourceState,
  RetryBackoff, RetryPolicy,
};
use banyan_resource::{NodeId, ResourceSpec, Urn, Value};
use banyan_store::{MemoryStore, StateStore};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Mock provider that records calls, tracks in-flight concurrency, and can
/// be configured to fail, throttle, or cancel a run mid-operation.
#[derive(Default)]
struct MockProvider {
  /// (op, urn, inputs) for every successful call, in completion order.
  calls: Mutex<Vec<(&'static str, Urn, serde_json::Value)>>,
  outputs: Mutex<HashMap<Urn, serde_json::Value>>,
  fatal: Mutex<HashMap<Urn, String>>,
  /// Remaining retryable failures per urn.
  flaky: Mutex<HashMap<Urn, u32>>,
  /// Timestamp of every create/update attempt per urn.
  attempts: Mutex<HashMap<Urn, Vec<Instant>>>,
  delay: Mutex<Option<Duration>>,
  in_flight: AtomicUsize,
  high_water: AtomicUsize,
  /// Cancel this token at the end of the named resource's create.
  cancel_after: Mutex<HashMap<Urn, CancellationToken>>,
}

impl MockProvider {
  fn new() -> Self {
    Self::default()
  }

  fn set_outputs(&self, urn: &Urn, outputs: serde_json::Value) {
    self.outputs.lock().unwrap().insert(urn.clone(), outputs);
  }

  fn fail_with(&self, urn: &Urn, message: &str) {
    self
      .fatal
      .lock()
      .unwrap()
      .insert(urn.clone(), message.to_string());
  }

  fn throttle(&self, urn: &Urn, failures: u32) {
    self.flaky.lock().unwrap().insert(urn.clone(), failures);
  }

  fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  fn cancel_after(&self, urn: &Urn, token: CancellationToken) {
    self.cancel_after.lock().unwrap().insert(urn.clone(), token);
  }

  fn calls_of(&self, op: &str) -> Vec<Urn> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(o, _, _)| *o == op)
      .map(|(_, urn, _)| urn.clone())
      .collect()
  }

  fn inputs_of(&self, op: &str, urn: &Urn) -> Option<serde_json::Value> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .find(|(o, u, _)| *o == op && u == urn)
      .map(|(_, _, inputs)| inputs.clone())
  }

  fn attempt_times(&self, urn: &Urn) -> Vec<Instant> {
    self.attempts.lock().unwrap().get(urn).cloned().unwrap_or_default()
  }

  fn high_water(&self) -> usize {
    self.high_water.load(Ordering::SeqCst)
  }

  fn record(&self, op: &'static str, urn: &Urn, inputs: &serde_json::Value) {
    self
      .calls
      .lock()
      .unwrap()
      .push((op, urn.clone(), inputs.clone()));
  }

  async fn apply(
    &self,
    op: &'static str,
    urn: &Urn,
    inputs: &serde_json::Value,
  ) -> Result<ResourceOutputs, ProviderError> {
    self
      .attempts
      .lock()
      .unwrap()
      .entry(urn.clone())
      .or_default()
      .push(Instant::now());

    let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.high_water.fetch_max(current, Ordering::SeqCst);
    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if let Some(token) = self.cancel_after.lock().unwrap().get(urn) {
      token.cancel();
    }

    if let Some(remaining) = self.flaky.lock().unwrap().get_mut(urn) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(ProviderError::retryable("throttled"));
      }
    }

    if let Some(message) = self.fatal.lock().unwrap().get(urn) {
      return Err(ProviderError::fatal(message.clone()));
    }

    self.record(op, urn, inputs);

    let outputs = self
      .outputs
      .lock()
      .unwrap()
      .get(urn)
      .cloned()
      .unwrap_or_else(|| json!({"id": format!("{urn}-live")}));
    Ok(outputs.as_object().cloned().unwrap_or_default())
  }
}

#[async_trait]
impl Provider for MockProvider {
  async fn diff(
    &self,
    _urn: &Urn,
    desired: &serde_json::Value,
    last_known: Option<&ResourceState>,
  ) -> Result<OperationKind, ProviderError> {
    Ok(diff_by_inputs(desired, last_known))
  }

  async fn create(
    &self,
    urn: &Urn,
    inputs: &serde_json::Value,
  ) -> Result<ResourceOutputs, ProviderError> {
    self.apply("create", urn, inputs).await
  }

  async fn read(&self, _urn: &Urn) -> Result<Option<ResourceState>, ProviderError> {
    Ok(None)
  }

  async fn update(
    &self,
    urn: &Urn,
    inputs: &serde_json::Value,
    _last_known: &ResourceState,
  ) -> Result<ResourceOutputs, ProviderError> {
    self.apply("update", urn, inputs).await
  }

  async fn delete(&self, urn: &Urn, _last_known: &ResourceState) -> Result<(), ProviderError> {
    if let Some(message) = self.fatal.lock().unwrap().get(urn) {
      return Err(ProviderError::fatal(message.clone()));
    }
    self.record("delete", urn, &serde_json::Value::Null);
    Ok(())
  }
}

fn harness() -> (Arc<MockProvider>, Arc<MemoryStore>, Executor) {
  let provider = Arc::new(MockProvider::new());
  let store = Arc::new(MemoryStore::new());
  let executor = Executor::new(provider.clone(), store.clone());
  (provider, store, executor)
}

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

fn simple(name: &str) -> ResourceSpec {
  ResourceSpec::builder("test:Thing", name)
    .input("name", name)
    .build()
}

fn stored(urn: Urn, inputs: serde_json::Value, outputs: serde_json::Value) -> ResourceState {
  ResourceState {
    urn,
    type_token: "test:Thing".to_string(),
    inputs,
    outputs,
    updated_at: Utc::now(),
  }
}

#[tokio::test]
async fn every_node_reaches_a_terminal_state() {
  let (_, _, executor) = harness();

  let tip = ResourceSpec::builder("test:Thing", "tip")
    .input("l", Value::reference("left", "id"))
    .input("r", Value::reference("right", "id"))
    .build();
  let left = ResourceSpec::builder("test:Thing", "left")
    .input("root", Value::reference("root", "id"))
    .build();
  let right = ResourceSpec::builder("test:Thing", "right")
    .input("root", Value::reference("root", "id"))
    .build();

  let graph = GraphBuilder::build([simple("root"), left, right, tip]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  assert!(report.succeeded());
  assert_eq!(report.outcomes.len(), 4);
  for outcome in &report.outcomes {
    assert_eq!(outcome.state, NodeState::Done);
    assert!(outcome.started_at.is_some());
    assert!(outcome.finished_at.is_some());
    assert!(outcome.attempts >= 1);
  }
}

#[tokio::test]
async fn dependencies_are_dispatched_before_dependents() {
  let (provider, _, executor) = harness();
  provider.set_outputs(&Urn::new("aws:s3:Bucket", "bucket"), json!({"bucket": "b-7fa3"}));

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  assert_eq!(graph.dependencies(1), &[0]);

  let report = executor.run(graph, RunOptions::default()).await.unwrap();
  assert!(report.succeeded());

  let creates = provider.calls_of("create");
  assert_eq!(
    creates,
    vec![
      Urn::new("aws:s3:Bucket", "bucket"),
      Urn::new("aws:s3:BucketPolicy", "policy"),
    ]
  );
}

#[tokio::test]
async fn resolved_outputs_flow_into_dependent_inputs() {
  let (provider, _, executor) = harness();
  let bucket_urn = Urn::new("aws:s3:Bucket", "bucket");
  provider.set_outputs(&bucket_urn, json!({"bucket": "b-7fa3"}));

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  assert_eq!(
    report.outcome(&NodeId::new("policy")).unwrap().state,
    NodeState::Done
  );
  let inputs = provider
    .inputs_of("create", &Urn::new("aws:s3:BucketPolicy", "policy"))
    .unwrap();
  assert_eq!(inputs, json!({"bucket": "b-7fa3"}));
}

#[tokio::test]
async fn ready_ties_break_by_declaration_order() {
  let (provider, _, executor) = harness();

  let graph = GraphBuilder::build([simple("zeta"), simple("alpha"), simple("mid")]).unwrap();
  let options = RunOptions {
    concurrency_limit: 1,
    ..RunOptions::default()
  };
  executor.run(graph, options).await.unwrap();

  assert_eq!(
    provider.calls_of("create"),
    vec![
      Urn::new("test:Thing", "zeta"),
      Urn::new("test:Thing", "alpha"),
      Urn::new("test:Thing", "mid"),
    ]
  );
}

#[tokio::test]
async fn failure_skips_transitive_dependents_only() {
  let (provider, _, executor) = harness();
  let boom_urn = Urn::new("test:Thing", "boom");
  provider.fail_with(&boom_urn, "access denied");

  let c = ResourceSpec::builder("test:Thing", "c")
    .input("up", Value::reference("boom", "id"))
    .build();
  let d = ResourceSpec::builder("test:Thing", "d")
    .input("up", Value::reference("c", "id"))
    .build();

  let graph = GraphBuilder::build([simple("boom"), c, d, simple("free")]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  assert!(!report.succeeded());
  let boom = report.outcome(&NodeId::new("boom")).unwrap();
  assert_eq!(boom.state, NodeState::Failed);
  assert_eq!(boom.error.as_deref(), Some("access denied"));

  for skipped in ["c", "d"] {
    let outcome = report.outcome(&NodeId::new(skipped)).unwrap();
    assert_eq!(outcome.state, NodeState::Skipped);
    assert!(outcome.error.as_ref().unwrap().contains("boom"));
  }

  assert_eq!(
    report.outcome(&NodeId::new("free")).unwrap().state,
    NodeState::Done
  );

  let creates = provider.calls_of("create");
  assert!(creates.contains(&Urn::new("test:Thing", "free")));
  assert!(!creates.contains(&Urn::new("test:Thing", "c")));
  assert!(!creates.contains(&Urn::new("test:Thing", "d")));
}

#[tokio::test]
async fn missing_output_field_fails_the_referencing_node() {
  let (provider, _, executor) = harness();
  provider.set_outputs(&Urn::new("aws:s3:Bucket", "bucket"), json!({}));

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  assert_eq!(
    report.outcome(&NodeId::new("bucket")).unwrap().state,
    NodeState::Done
  );
  let policy = report.outcome(&NodeId::new("policy")).unwrap();
  assert_eq!(policy.state, NodeState::Failed);
  assert!(policy
    .error
    .as_ref()
    .unwrap()
    .contains("did not produce output"));
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_failures_back_off_exponentially() {
  let (provider, _, executor) = harness();
  let urn = Urn::new("test:Thing", "flaky");
  provider.throttle(&urn, 3);

  let options = RunOptions {
    retry: RetryPolicy {
      max_attempts: 5,
      backoff: RetryBackoff::Exponential,
      initial_delay: Duration::from_millis(40),
      max_delay: Duration::from_secs(1),
    },
    ..RunOptions::default()
  };

  let graph = GraphBuilder::build([simple("flaky")]).unwrap();
  let report = executor.run(graph, options).await.unwrap();

  let outcome = report.outcome(&NodeId::new("flaky")).unwrap();
  assert_eq!(outcome.state, NodeState::Done);
  assert_eq!(outcome.attempts, 4);

  let times = provider.attempt_times(&urn);
  assert_eq!(times.len(), 4);
  let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
  assert!(gaps[0] >= Duration::from_millis(40));
  assert!(gaps[1] >= gaps[0]);
  assert!(gaps[2] >= gaps[1]);
}

#[tokio::test]
async fn non_retryable_failures_are_not_retried() {
  let (provider, _, executor) = harness();
  let urn = Urn::new("test:Thing", "denied");
  provider.fail_with(&urn, "permission denied");

  let graph = GraphBuilder::build([simple("denied")]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  let outcome = report.outcome(&NodeId::new("denied")).unwrap();
  assert_eq!(outcome.state, NodeState::Failed);
  assert_eq!(outcome.attempts, 1);
  assert_eq!(provider.attempt_times(&urn).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_never_exceeds_the_limit() {
  let (provider, _, executor) = harness();
  provider.set_delay(Duration::from_millis(100));

  let specs: Vec<ResourceSpec> = (0..6).map(|i| simple(&format!("n{i}"))).collect();
  let graph = GraphBuilder::build(specs).unwrap();

  let options = RunOptions {
    concurrency_limit: 2,
    ..RunOptions::default()
  };
  let report = executor.run(graph, options).await.unwrap();

  assert!(report.succeeded());
  assert_eq!(provider.high_water(), 2);
}

#[tokio::test]
async fn unchanged_resources_are_noops() {
  let (provider, store, executor) = harness();
  let bucket_urn = Urn::new("aws:s3:Bucket", "bucket");
  store
    .save(&stored(
      bucket_urn.clone(),
      json!({"force_destroy": true}),
      json!({"bucket": "seeded"}),
    ))
    .await
    .unwrap();

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  let outcome = report.outcome(&NodeId::new("bucket")).unwrap();
  assert_eq!(outcome.state, NodeState::Done);
  assert_eq!(outcome.operation, Some(OperationKind::Noop));
  assert!(!provider.calls_of("create").contains(&bucket_urn));

  // The dependent still resolves against the stored outputs.
  let inputs = provider
    .inputs_of("create", &Urn::new("aws:s3:BucketPolicy", "policy"))
    .unwrap();
  assert_eq!(inputs, json!({"bucket": "seeded"}));
}

#[tokio::test]
async fn changed_resources_are_updated_in_place() {
  let (provider, store, executor) = harness();
  let bucket_urn = Urn::new("aws:s3:Bucket", "bucket");
  store
    .save(&stored(
      bucket_urn.clone(),
      json!({"force_destroy": false}),
      json!({"bucket": "old"}),
    ))
    .await
    .unwrap();
  provider.set_outputs(&bucket_urn, json!({"bucket": "new"}));

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  let report = executor.run(graph, RunOptions::default()).await.unwrap();

  let outcome = report.outcome(&NodeId::new("bucket")).unwrap();
  assert_eq!(outcome.operation, Some(OperationKind::Update));
  assert_eq!(provider.calls_of("update"), vec![bucket_urn.clone()]);

  let saved = store.load(&bucket_urn).await.unwrap().unwrap();
  assert_eq!(saved.outputs, json!({"bucket": "new"}));
  assert_eq!(
    provider
      .inputs_of("create", &Urn::new("aws:s3:BucketPolicy", "policy"))
      .unwrap(),
    json!({"bucket": "new"})
  );
}

#[tokio::test]
async fn prune_deletes_exactly_the_undeclared_urns() {
  let (provider, store, executor) = harness();
  let orphan = Urn::new("test:Thing", "orphan");
  store
    .save(&stored(orphan.clone(), json!({}), json!({})))
    .await
    .unwrap();

  let graph = GraphBuilder::build([simple("kept")]).unwrap();
  let options = RunOptions {
    prune: true,
    ..RunOptions::default()
  };
  let report = executor.run(graph, options).await.unwrap();

  assert!(report.succeeded());
  assert_eq!(report.pruned, vec![orphan.clone()]);
  assert_eq!(provider.calls_of("delete"), vec![orphan.clone()]);
  assert!(store.load(&orphan).await.unwrap().is_none());
  assert!(store.load(&Urn::new("test:Thing", "kept")).await.unwrap().is_some());
}

#[tokio::test]
async fn prune_is_skipped_after_a_failure() {
  let (provider, store, executor) = harness();
  provider.fail_with(&Urn::new("test:Thing", "boom"), "nope");
  let orphan = Urn::new("test:Thing", "orphan");
  store
    .save(&stored(orphan.clone(), json!({}), json!({})))
    .await
    .unwrap();

  let graph = GraphBuilder::build([simple("boom")]).unwrap();
  let options = RunOptions {
    prune: true,
    ..RunOptions::default()
  };
  let report = executor.run(graph, options).await.unwrap();

  assert!(report.pruned.is_empty());
  assert!(provider.calls_of("delete").is_empty());
  assert!(store.load(&orphan).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_dispatch_but_keeps_done_nodes() {
  let (provider, _, executor) = harness();
  let cancel = CancellationToken::new();
  provider.cancel_after(&Urn::new("test:Thing", "first"), cancel.clone());

  let second = ResourceSpec::builder("test:Thing", "second")
    .input("up", Value::reference("first", "id"))
    .build();
  let third = ResourceSpec::builder("test:Thing", "third")
    .input("up", Value::reference("second", "id"))
    .build();

  let graph = GraphBuilder::build([simple("first"), second, third]).unwrap();
  let options = RunOptions {
    cancel: cancel.clone(),
    ..RunOptions::default()
  };
  let report = executor.run(graph, options).await.unwrap();

  assert!(report.cancelled);
  assert!(!report.succeeded());
  assert_eq!(
    report.outcome(&NodeId::new("first")).unwrap().state,
    NodeState::Done
  );
  for never_ran in ["second", "third"] {
    assert_eq!(
      report.outcome(&NodeId::new(never_ran)).unwrap().state,
      NodeState::Skipped
    );
  }
  assert_eq!(provider.calls_of("create").len(), 1);
}

#[tokio::test]
async fn plan_previews_without_mutating() {
  let (provider, store, executor) = harness();
  let unchanged = Urn::new("test:Thing", "unchanged");
  store
    .save(&stored(unchanged.clone(), json!({"name": "unchanged"}), json!({})))
    .await
    .unwrap();
  let drifted = Urn::new("test:Thing", "drifted");
  store
    .save(&stored(drifted.clone(), json!({"name": "was"}), json!({})))
    .await
    .unwrap();
  let orphan = Urn::new("test:Thing", "orphan");
  store
    .save(&stored(orphan.clone(), json!({}), json!({})))
    .await
    .unwrap();

  let graph =
    GraphBuilder::build([simple("unchanged"), simple("drifted"), simple("fresh")]).unwrap();
  let plan = executor.plan(&graph).await.unwrap();

  let operations: Vec<(String, OperationKind)> = plan
    .steps
    .iter()
    .map(|s| (s.node_id.to_string(), s.operation))
    .collect();
  assert_eq!(
    operations,
    vec![
      ("unchanged".to_string(), OperationKind::Noop),
      ("drifted".to_string(), OperationKind::Update),
      ("fresh".to_string(), OperationKind::Create),
    ]
  );
  assert_eq!(plan.changes(), 2);
  assert_eq!(plan.prune, vec![orphan]);

  // Diff-only: nothing was created, updated, or deleted.
  assert!(provider.calls_of("create").is_empty());
  assert!(provider.calls_of("update").is_empty());
  assert!(provider.calls_of("delete").is_empty());
  assert_eq!(store.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn plan_previews_references_from_stored_outputs() {
  let (provider, store, executor) = harness();
  let bucket_urn = Urn::new("aws:s3:Bucket", "bucket");
  store
    .save(&stored(
      bucket_urn,
      json!({"force_destroy": true}),
      json!({"bucket": "seeded"}),
    ))
    .await
    .unwrap();

  let graph = GraphBuilder::build([bucket(), policy()]).unwrap();
  let plan = executor.plan(&graph).await.unwrap();

  // The policy has no stored state, so it plans as a create; the bucket's
  // stored outputs were good enough to preview its inputs.
  assert_eq!(plan.steps[0].operation, OperationKind::Noop);
  assert_eq!(plan.steps[1].operation, OperationKind::Create);
  assert!(provider.calls_of("create").is_empty());
}
