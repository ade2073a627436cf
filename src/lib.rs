//! # Prometheus Orchestrator
//!
//! A resource-aware task orchestrator for AI agent workloads.
//!
//! Tasks declare the resources they hold while running (compute slots,
//! memory units, accelerators). The orchestrator admits a task only if the
//! pool can satisfy it, runs ready tasks on a fixed pool of worker threads in
//! priority/deadline order, enforces dependency order across multi-step
//! plans, and merges member outcomes into one plan result.
//!
//! ## Core Problem Solved
//!
//! Agent workloads fan out into many heterogeneous steps that compete for
//! scarce capacity:
//!
//! - **Bounded Resources**: Two model calls that each need most of a GPU must
//!   not run together; over-subscription is rejected at the door instead of
//!   failing mid-run.
//! - **Ordered Plans**: A summarization step must not start before the
//!   retrieval steps it consumes have completed.
//! - **Failure Containment**: A failed step cancels everything downstream of
//!   it instead of leaving dependents waiting forever.
//! - **Bounded Latency**: Deadlines and cooperative cancellation free
//!   resources held by work nobody is waiting for.
//!
//! ## Key Features
//!
//! - **Atomic Resource Accounting**: Reservations and releases are
//!   all-or-nothing per task and never drive a counter below zero
//! - **Priority/Deadline Queue**: Priority first, earliest deadline next,
//!   then an optional scheduling hint, then submission order
//! - **Dependency Layers**: Plans are reduced to layers with Kahn's
//!   algorithm; any cycle rejects the whole plan before anything is reserved
//! - **Worker Threads**: Dedicated OS threads, each with its own
//!   current-thread Tokio runtime, so handler work never blocks the caller
//! - **Bounded Retries**: Exponential backoff at the handler boundary
//! - **Audit Trail and Events**: Every lifecycle change is recorded and
//!   broadcast to subscribers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use prometheus_orchestrator::builders::OrchestratorBuilder;
//! use prometheus_orchestrator::config::OrchestratorConfig;
//! use prometheus_orchestrator::core::{PlanSpec, TaskSpec};
//! use prometheus_orchestrator::util::requirements;
//!
//! let orchestrator = OrchestratorBuilder::new(
//!     OrchestratorConfig::new()
//!         .with_resource("compute", 4)
//!         .with_worker_count(4),
//! )
//! .handler_fn("fetch", |params, _ctx| async move { Ok(params["url"].clone()) })
//! .handler_fn("summarize", |_params, _ctx| async move { Ok("summary".into()) })
//! .build()?;
//!
//! let plan = PlanSpec::new("research-1")
//!     .task("a", TaskSpec::new("fetch", requirements([("compute", 1)])).with_param("url", "a"))
//!     .task("b", TaskSpec::new("fetch", requirements([("compute", 1)])).with_param("url", "b"))
//!     .task("s", TaskSpec::new("summarize", requirements([("compute", 2)])))
//!     .edge("a", "s")
//!     .edge("b", "s");
//!
//! let receipt = orchestrator.submit_plan(plan)?;
//! let result = orchestrator.wait_for_plan(&receipt.plan_id, Duration::from_secs(30))?;
//! println!("{result:?}");
//! orchestrator.shutdown();
//! # Ok::<(), prometheus_orchestrator::core::OrchestratorError>(())
//! ```
//!
//! For complete scenarios, see `tests/orchestrator_scenarios.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core orchestration: admission, queueing, resources, and execution.
pub mod core;
/// Configuration models and loaders.
pub mod config;
/// Builders to construct an orchestrator from configuration.
pub mod builders;
/// Infrastructure adapters for queues.
pub mod infra;
/// Transport-agnostic API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
