//! Banyan Engine
//!
//! This crate executes a validated dependency graph against a provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Executor                             │
//! │  - run(graph, options) → ExecutionReport                    │
//! │  - plan(graph) → Plan (diff-only preview)                   │
//! │  - ready-set scheduling, bounded concurrency                │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      node pipeline                          │
//! │  - await referenced Outputs → resolve input document        │
//! │  - load last-known state → diff → create/update/delete/noop │
//! │  - save state, resolve this node's Output cells             │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Provider / StateStore traits                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failure of one node never aborts sibling subtrees: its transitive
//! dependents are Skipped and everything else still runs to a terminal
//! state. The run returns an aggregate [`ExecutionReport`].

mod error;
mod executor;
mod options;
mod output;
mod plan;
mod report;

pub use error::EngineError;
pub use executor::Executor;
pub use options::RunOptions;
pub use output::{Output, OutputError, Wait};
pub use plan::{Plan, PlannedStep};
pub use report::{ExecutionReport, NodeOutcome, PruneError};
