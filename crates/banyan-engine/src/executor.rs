//! Graph execution.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use banyan_graph::{Graph, NodeState, StateTable};
use banyan_provider::{
  OperationKind, Provider, ProviderError, ResourceOutputs, ResourceState, RetryPolicy,
};
use banyan_resource::{Urn, Value};
use banyan_store::StateStore;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::options::RunOptions;
use crate::output::Output;
use crate::plan::{Plan, PlannedStep};
use crate::report::{ExecutionReport, NodeOutcome, PruneError};

/// Per-node output cells, indexed by declaration order. Only fields that
/// some spec actually references get a cell.
type OutputCells = Arc<Vec<HashMap<String, Output<serde_json::Value>>>>;

/// Executes validated graphs against a provider and a state store.
pub struct Executor {
  provider: Arc<dyn Provider>,
  store: Arc<dyn StateStore>,
}

impl Executor {
  pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
    Self { provider, store }
  }

  /// Walk the graph in dependency order and converge every node.
  ///
  /// Nodes whose dependencies are Done become ready; ready nodes are
  /// dispatched in declaration order, up to `options.concurrency_limit` in
  /// flight at once. A failed node fails alone: its transitive dependents
  /// are Skipped and every other subtree still runs. The returned report
  /// covers every node.
  pub async fn run(&self, graph: Graph, options: RunOptions) -> Result<ExecutionReport, EngineError> {
    let execution_id = Uuid::new_v4().to_string();
    self.run_inner(graph, options, execution_id).await
  }

  #[instrument(
    name = "run",
    skip_all,
    fields(execution_id = %execution_id, nodes = graph.len())
  )]
  async fn run_inner(
    &self,
    graph: Graph,
    options: RunOptions,
    execution_id: String,
  ) -> Result<ExecutionReport, EngineError> {
    let started_at = Utc::now();
    info!(execution_id = %execution_id, nodes = graph.len(), "run_started");

    let graph = Arc::new(graph);
    let states = StateTable::new(graph.len());
    let cells = build_output_cells(&graph);
    let concurrency_limit = options.concurrency_limit.max(1);

    let mut outcomes: Vec<NodeOutcome> = graph
      .nodes()
      .iter()
      .map(|node| NodeOutcome {
        node_id: node.id.clone(),
        urn: node.urn(),
        state: NodeState::Pending,
        operation: None,
        attempts: 0,
        error: None,
        started_at: None,
        finished_at: None,
      })
      .collect();

    let mut remaining_deps: Vec<usize> =
      (0..graph.len()).map(|i| graph.dependencies(i).len()).collect();

    let mut ready: BTreeSet<usize> = BTreeSet::new();
    for index in graph.entry_points() {
      transition(&states, &graph, index, NodeState::Pending, NodeState::Ready)?;
      ready.insert(index);
    }

    let mut join_set: JoinSet<NodeRun> = JoinSet::new();

    loop {
      // Dispatch in declaration order while capacity remains. Cancellation
      // stops dispatch but in-flight work below still drains.
      while join_set.len() < concurrency_limit && !options.cancel.is_cancelled() {
        let Some(&index) = ready.first() else { break };
        ready.remove(&index);

        transition(&states, &graph, index, NodeState::Ready, NodeState::Running)?;
        outcomes[index].started_at = Some(Utc::now());
        info!(
          execution_id = %execution_id,
          node_id = %graph.node(index).id,
          "node_dispatched"
        );

        join_set.spawn(execute_node(
          Arc::clone(&graph),
          Arc::clone(&cells),
          Arc::clone(&self.provider),
          Arc::clone(&self.store),
          options.retry.clone(),
          options.cancel.clone(),
          index,
        ));
      }

      if join_set.is_empty() {
        break;
      }

      let Some(joined) = join_set.join_next().await else {
        break;
      };
      let run = joined
        .map_err(|e| EngineError::Invariant(format!("node task panicked: {e}")))?;
      let index = run.index;
      let node_id = graph.node(index).id.clone();
      outcomes[index].finished_at = Some(Utc::now());

      match run.result {
        Ok(success) => {
          transition(&states, &graph, index, NodeState::Running, NodeState::Done)?;

          for (field, cell) in &cells[index] {
            let completed = match success.outputs.get(field) {
              Some(value) => cell.resolve(value.clone()),
              None => cell.fail(format!(
                "resource '{}' did not produce output '{}'",
                node_id, field
              )),
            };
            completed.map_err(|_| {
              EngineError::Invariant(format!("output '{}.{}' resolved twice", node_id, field))
            })?;
          }

          outcomes[index].state = NodeState::Done;
          outcomes[index].operation = Some(success.operation);
          outcomes[index].attempts = success.attempts;
          info!(
            execution_id = %execution_id,
            node_id = %node_id,
            operation = ?success.operation,
            attempts = success.attempts,
            "node_done"
          );

          for &dependent in graph.dependents(index) {
            remaining_deps[dependent] = remaining_deps[dependent].saturating_sub(1);
            if remaining_deps[dependent] == 0 && states.get(dependent) == NodeState::Pending {
              transition(&states, &graph, dependent, NodeState::Pending, NodeState::Ready)?;
              ready.insert(dependent);
            }
          }
        }
        Err(failure) => {
          transition(&states, &graph, index, NodeState::Running, NodeState::Failed)?;

          for (field, cell) in &cells[index] {
            cell
              .fail(format!("resource '{}' failed: {}", node_id, failure.message))
              .map_err(|_| {
                EngineError::Invariant(format!("output '{}.{}' resolved twice", node_id, field))
              })?;
          }

          outcomes[index].state = NodeState::Failed;
          outcomes[index].operation = failure.operation;
          outcomes[index].attempts = failure.attempts;
          outcomes[index].error = Some(failure.message.clone());
          error!(
            execution_id = %execution_id,
            node_id = %node_id,
            error = %failure.message,
            attempts = failure.attempts,
            "node_failed"
          );

          self.skip_dependents(
            &graph,
            &states,
            &cells,
            &mut ready,
            &mut outcomes,
            &execution_id,
            index,
          )?;
        }
      }
    }

    // After the walk every node must be terminal; only cancellation leaves
    // undispatched work behind.
    let cancelled = options.cancel.is_cancelled();
    for index in 0..graph.len() {
      let state = states.get(index);
      if state.is_terminal() {
        continue;
      }
      if !cancelled {
        return Err(EngineError::Invariant(format!(
          "node '{}' finished the walk in state {:?}",
          graph.node(index).id,
          state
        )));
      }
      transition(&states, &graph, index, state, NodeState::Skipped)?;
      outcomes[index].state = NodeState::Skipped;
      outcomes[index].error = Some("run cancelled before dispatch".to_string());
      info!(
        execution_id = %execution_id,
        node_id = %graph.node(index).id,
        "node_skipped"
      );
    }

    let any_failed = outcomes.iter().any(|o| o.state == NodeState::Failed);
    let (pruned, prune_errors) = if options.prune && !cancelled && !any_failed {
      self.prune(&graph, &options, &execution_id).await
    } else {
      (Vec::new(), Vec::new())
    };

    let report = ExecutionReport {
      execution_id: execution_id.clone(),
      outcomes,
      pruned,
      prune_errors,
      cancelled,
      started_at,
      finished_at: Utc::now(),
    };

    if report.succeeded() {
      info!(execution_id = %execution_id, "run_completed");
    } else {
      warn!(
        execution_id = %execution_id,
        cancelled = report.cancelled,
        failed = report.outcomes.iter().filter(|o| o.state == NodeState::Failed).count(),
        "run_completed_with_errors"
      );
    }

    Ok(report)
  }

  #[allow(clippy::too_many_arguments)]
  fn skip_dependents(
    &self,
    graph: &Graph,
    states: &StateTable,
    cells: &OutputCells,
    ready: &mut BTreeSet<usize>,
    outcomes: &mut [NodeOutcome],
    execution_id: &str,
    failed: usize,
  ) -> Result<(), EngineError> {
    let failed_id = graph.node(failed).id.clone();
    let mut stack: Vec<usize> = graph.dependents(failed).to_vec();

    while let Some(index) = stack.pop() {
      let state = states.get(index);
      if !matches!(state, NodeState::Pending | NodeState::Ready) {
        continue;
      }
      if states.transition(index, state, NodeState::Skipped).is_err() {
        // Lost a race with another skip path; the dependents are covered.
        continue;
      }

      ready.remove(&index);
      let node_id = graph.node(index).id.clone();
      for cell in cells[index].values() {
        // A skipped node never ran, so its cells cannot be complete.
        let _ = cell.fail(format!("resource '{}' was skipped", node_id));
      }
      outcomes[index].state = NodeState::Skipped;
      outcomes[index].error = Some(format!("skipped: dependency '{}' failed", failed_id));
      info!(
        execution_id = %execution_id,
        node_id = %node_id,
        failed_dependency = %failed_id,
        "node_skipped"
      );

      stack.extend_from_slice(graph.dependents(index));
    }

    Ok(())
  }

  async fn prune(
    &self,
    graph: &Graph,
    options: &RunOptions,
    execution_id: &str,
  ) -> (Vec<Urn>, Vec<PruneError>) {
    let declared: BTreeSet<Urn> = graph.nodes().iter().map(|n| n.urn()).collect();
    let mut pruned = Vec::new();
    let mut errors = Vec::new();

    let stored = match self.store.list().await {
      Ok(stored) => stored,
      Err(e) => {
        errors.push(PruneError {
          urn: None,
          message: format!("state list failed: {e}"),
        });
        return (pruned, errors);
      }
    };

    // Reverse urn order: deterministic, and children created after their
    // parents in earlier runs tend to sort later.
    for state in stored.into_iter().rev() {
      if declared.contains(&state.urn) {
        continue;
      }
      let urn = state.urn.clone();

      let (result, _attempts) = with_retry(&options.retry, &options.cancel, &urn, "delete", || {
        self.provider.delete(&urn, &state)
      })
      .await;

      match result {
        Ok(()) => match self.store.remove(&urn).await {
          Ok(()) => {
            info!(execution_id = %execution_id, urn = %urn, "resource_pruned");
            pruned.push(urn);
          }
          Err(e) => errors.push(PruneError {
            urn: Some(urn),
            message: format!("state remove failed: {e}"),
          }),
        },
        Err(e) => {
          warn!(execution_id = %execution_id, urn = %urn, error = %e, "prune_failed");
          errors.push(PruneError {
            urn: Some(urn),
            message: e.to_string(),
          });
        }
      }
    }

    (pruned, errors)
  }

  /// Preview the operations a run would perform, without mutating anything.
  ///
  /// Nodes are visited in the same deterministic order the executor
  /// dispatches them. References to outputs that do not exist yet are
  /// previewed from stored state where possible, JSON null otherwise.
  pub async fn plan(&self, graph: &Graph) -> Result<Plan, EngineError> {
    let mut remaining_deps: Vec<usize> =
      (0..graph.len()).map(|i| graph.dependencies(i).len()).collect();
    let mut ready: BTreeSet<usize> = graph.entry_points().into_iter().collect();
    let mut steps = Vec::with_capacity(graph.len());

    while let Some(&index) = ready.first() {
      ready.remove(&index);
      let node = graph.node(index);
      let urn = node.urn();

      let desired = self.preview_inputs(graph, index).await?;
      let last_known = self.store.load(&urn).await?;
      let operation = self
        .provider
        .diff(&urn, &desired, last_known.as_ref())
        .await?;

      steps.push(PlannedStep {
        node_id: node.id.clone(),
        urn,
        operation,
      });

      for &dependent in graph.dependents(index) {
        remaining_deps[dependent] = remaining_deps[dependent].saturating_sub(1);
        if remaining_deps[dependent] == 0 {
          ready.insert(dependent);
        }
      }
    }

    let declared: BTreeSet<Urn> = graph.nodes().iter().map(|n| n.urn()).collect();
    let prune = self
      .store
      .list()
      .await?
      .into_iter()
      .map(|state| state.urn)
      .filter(|urn| !declared.contains(urn))
      .collect();

    Ok(Plan { steps, prune })
  }

  /// Materialize a preview input document: references are substituted from
  /// the referenced resource's stored outputs when present.
  async fn preview_inputs(
    &self,
    graph: &Graph,
    index: usize,
  ) -> Result<serde_json::Value, EngineError> {
    let node = graph.node(index);

    let mut stored_outputs: HashMap<&banyan_resource::NodeId, serde_json::Value> = HashMap::new();
    for reference in node.spec.references() {
      if stored_outputs.contains_key(&reference.node) {
        continue;
      }
      let Some(target) = graph.get(&reference.node) else {
        continue;
      };
      let outputs = self
        .store
        .load(&target.urn())
        .await?
        .map(|state| state.outputs)
        .unwrap_or(serde_json::Value::Null);
      stored_outputs.insert(&reference.node, outputs);
    }

    let mut document = serde_json::Map::new();
    for (key, value) in &node.spec.inputs {
      document.insert(key.clone(), preview_value(value, &stored_outputs));
    }
    Ok(serde_json::Value::Object(document))
  }
}

fn preview_value(
  value: &Value,
  stored_outputs: &HashMap<&banyan_resource::NodeId, serde_json::Value>,
) -> serde_json::Value {
  match value {
    Value::Literal(v) => v.clone(),
    Value::Reference(r) => stored_outputs
      .get(&r.node)
      .and_then(|outputs| outputs.get(&r.field))
      .cloned()
      .unwrap_or(serde_json::Value::Null),
    Value::Object(fields) => serde_json::Value::Object(
      fields
        .iter()
        .map(|(k, v)| (k.clone(), preview_value(v, stored_outputs)))
        .collect(),
    ),
    Value::List(items) => serde_json::Value::Array(
      items.iter().map(|v| preview_value(v, stored_outputs)).collect(),
    ),
  }
}

fn transition(
  states: &StateTable,
  graph: &Graph,
  index: usize,
  from: NodeState,
  to: NodeState,
) -> Result<(), EngineError> {
  states.transition(index, from, to).map_err(|actual| {
    EngineError::Invariant(format!(
      "node '{}': transition {:?} -> {:?} found {:?}",
      graph.node(index).id,
      from,
      to,
      actual
    ))
  })
}

fn build_output_cells(graph: &Graph) -> OutputCells {
  let mut fields: Vec<BTreeSet<String>> = vec![BTreeSet::new(); graph.len()];
  for node in graph.nodes() {
    for reference in node.spec.references() {
      if let Some(index) = graph.index_of(&reference.node) {
        fields[index].insert(reference.field.clone());
      }
    }
  }

  Arc::new(
    fields
      .into_iter()
      .map(|fields| {
        fields
          .into_iter()
          .map(|field| (field, Output::new()))
          .collect()
      })
      .collect(),
  )
}

struct NodeRun {
  index: usize,
  result: Result<NodeSuccess, NodeFailure>,
}

struct NodeSuccess {
  operation: OperationKind,
  outputs: ResourceOutputs,
  attempts: u32,
}

struct NodeFailure {
  operation: Option<OperationKind>,
  attempts: u32,
  message: String,
}

/// The per-node pipeline: resolve inputs, load last-known state, diff,
/// apply, persist. Runs inside a spawned task.
async fn execute_node(
  graph: Arc<Graph>,
  cells: OutputCells,
  provider: Arc<dyn Provider>,
  store: Arc<dyn StateStore>,
  retry: RetryPolicy,
  cancel: CancellationToken,
  index: usize,
) -> NodeRun {
  let result = node_pipeline(&graph, &cells, &*provider, &*store, &retry, &cancel, index).await;
  NodeRun { index, result }
}

async fn node_pipeline(
  graph: &Graph,
  cells: &OutputCells,
  provider: &dyn Provider,
  store: &dyn StateStore,
  retry: &RetryPolicy,
  cancel: &CancellationToken,
  index: usize,
) -> Result<NodeSuccess, NodeFailure> {
  let node = graph.node(index);
  let urn = node.urn();

  let inputs = resolve_inputs(graph, cells, index)
    .await
    .map_err(|message| NodeFailure {
      operation: None,
      attempts: 0,
      message,
    })?;

  let last_known = store.load(&urn).await.map_err(|e| NodeFailure {
    operation: None,
    attempts: 0,
    message: format!("state load failed: {e}"),
  })?;

  let (diffed, diff_attempts) = with_retry(retry, cancel, &urn, "diff", || {
    provider.diff(&urn, &inputs, last_known.as_ref())
  })
  .await;
  let operation = diffed.map_err(|e| NodeFailure {
    operation: None,
    attempts: diff_attempts,
    message: e.to_string(),
  })?;

  match operation {
    OperationKind::Noop => {
      let outputs = last_known
        .map(|state| state.outputs)
        .and_then(|outputs| outputs.as_object().cloned())
        .unwrap_or_default();
      Ok(NodeSuccess {
        operation,
        outputs,
        attempts: diff_attempts,
      })
    }
    OperationKind::Create => {
      let (created, attempts) =
        with_retry(retry, cancel, &urn, "create", || provider.create(&urn, &inputs)).await;
      let outputs = created.map_err(|e| failure(operation, attempts, e))?;
      persist(store, node, &urn, &inputs, &outputs)
        .await
        .map_err(|message| NodeFailure {
          operation: Some(operation),
          attempts,
          message,
        })?;
      Ok(NodeSuccess {
        operation,
        outputs,
        attempts,
      })
    }
    OperationKind::Update => {
      let Some(last) = last_known else {
        return Err(NodeFailure {
          operation: Some(operation),
          attempts: diff_attempts,
          message: "provider chose update with no last-known state".to_string(),
        });
      };
      let (updated, attempts) = with_retry(retry, cancel, &urn, "update", || {
        provider.update(&urn, &inputs, &last)
      })
      .await;
      let outputs = updated.map_err(|e| failure(operation, attempts, e))?;
      persist(store, node, &urn, &inputs, &outputs)
        .await
        .map_err(|message| NodeFailure {
          operation: Some(operation),
          attempts,
          message,
        })?;
      Ok(NodeSuccess {
        operation,
        outputs,
        attempts,
      })
    }
    OperationKind::Delete => {
      let Some(last) = last_known else {
        // Nothing exists; deleting is already converged.
        return Ok(NodeSuccess {
          operation,
          outputs: ResourceOutputs::new(),
          attempts: diff_attempts,
        });
      };
      let (deleted, attempts) =
        with_retry(retry, cancel, &urn, "delete", || provider.delete(&urn, &last)).await;
      deleted.map_err(|e| failure(operation, attempts, e))?;
      store.remove(&urn).await.map_err(|e| NodeFailure {
        operation: Some(operation),
        attempts,
        message: format!("state remove failed: {e}"),
      })?;
      Ok(NodeSuccess {
        operation,
        outputs: ResourceOutputs::new(),
        attempts,
      })
    }
  }
}

fn failure(operation: OperationKind, attempts: u32, error: ProviderError) -> NodeFailure {
  NodeFailure {
    operation: Some(operation),
    attempts,
    message: error.to_string(),
  }
}

async fn persist(
  store: &dyn StateStore,
  node: &banyan_graph::Node,
  urn: &Urn,
  inputs: &serde_json::Value,
  outputs: &ResourceOutputs,
) -> Result<(), String> {
  let state = ResourceState {
    urn: urn.clone(),
    type_token: node.spec.type_token.clone(),
    inputs: inputs.clone(),
    outputs: serde_json::Value::Object(outputs.clone()),
    updated_at: Utc::now(),
  };
  store
    .save(&state)
    .await
    .map_err(|e| format!("state save failed: {e}"))
}

/// Await every referenced output, then materialize the input document with
/// references substituted by their resolved values.
async fn resolve_inputs(
  graph: &Graph,
  cells: &OutputCells,
  index: usize,
) -> Result<serde_json::Value, String> {
  let node = graph.node(index);

  let mut resolved: HashMap<(usize, String), serde_json::Value> = HashMap::new();
  for reference in node.spec.references() {
    let target = graph
      .index_of(&reference.node)
      .ok_or_else(|| format!("unknown reference to '{}'", reference.node))?;
    if resolved.contains_key(&(target, reference.field.clone())) {
      continue;
    }
    let cell = cells[target].get(&reference.field).ok_or_else(|| {
      format!(
        "no output cell for '{}.{}'",
        reference.node, reference.field
      )
    })?;
    let value = cell.wait().await.map_err(|e| {
      format!(
        "output '{}.{}' unavailable: {}",
        reference.node, reference.field, e
      )
    })?;
    resolved.insert((target, reference.field.clone()), value);
  }

  let mut document = serde_json::Map::new();
  for (key, value) in &node.spec.inputs {
    document.insert(key.clone(), substitute(graph, value, &resolved)?);
  }
  Ok(serde_json::Value::Object(document))
}

fn substitute(
  graph: &Graph,
  value: &Value,
  resolved: &HashMap<(usize, String), serde_json::Value>,
) -> Result<serde_json::Value, String> {
  match value {
    Value::Literal(v) => Ok(v.clone()),
    Value::Reference(r) => {
      let target = graph
        .index_of(&r.node)
        .ok_or_else(|| format!("unknown reference to '{}'", r.node))?;
      resolved
        .get(&(target, r.field.clone()))
        .cloned()
        .ok_or_else(|| format!("unresolved reference '{}.{}'", r.node, r.field))
    }
    Value::Object(fields) => {
      let mut document = serde_json::Map::new();
      for (key, value) in fields {
        document.insert(key.clone(), substitute(graph, value, resolved)?);
      }
      Ok(serde_json::Value::Object(document))
    }
    Value::List(items) => {
      let mut array = Vec::with_capacity(items.len());
      for item in items {
        array.push(substitute(graph, item, resolved)?);
      }
      Ok(serde_json::Value::Array(array))
    }
  }
}

/// Run a provider call, retrying retryable failures per the policy.
///
/// Returns the final result plus the number of attempts made. Backoff
/// sleeps race the cancellation token; cancellation surfaces the last
/// provider error instead of waiting out the delay.
async fn with_retry<T, F, Fut>(
  policy: &RetryPolicy,
  cancel: &CancellationToken,
  urn: &Urn,
  op: &'static str,
  f: F,
) -> (Result<T, ProviderError>, u32)
where
  F: Fn() -> Fut,
  Fut: Future<Output = Result<T, ProviderError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 0u32;

  loop {
    attempt += 1;
    match f().await {
      Ok(value) => return (Ok(value), attempt),
      Err(e) if e.retryable && attempt < max_attempts => {
        let delay = policy.delay_for(attempt);
        warn!(
          urn = %urn,
          op,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "provider_retry"
        );
        tokio::select! {
          _ = tokio::time::sleep(delay) => {}
          _ = cancel.cancelled() => return (Err(e), attempt),
        }
      }
      Err(e) => return (Err(e), attempt),
    }
  }
}
