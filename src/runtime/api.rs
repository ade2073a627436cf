//! API-facing request/response models and the functions mapping them onto
//! [`Orchestrator`] calls. Any transport (HTTP, IPC, a CLI) can serialize
//! these directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    DependencyEdge, ErrorKind, Orchestrator, OrchestratorError, Parameters, PlanMember, PlanResult,
    PlanSpec, PlanStatus, SubmitReceipt, PlanReceipt, TaskError, TaskRecord, TaskSpec, TaskStatus,
};
use crate::util::serde::{PlanId, Priority, ResourceKind, TaskId};

/// Task submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    /// Handler type tag.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Handler parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Priority, higher runs first.
    #[serde(default)]
    pub priority: Priority,
    /// Optional deadline (ms since epoch).
    #[serde(default)]
    pub deadline_ms: Option<u128>,
    /// Resource kind to quantity.
    pub requirements: BTreeMap<String, u32>,
    /// Tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Scheduling hint.
    #[serde(default)]
    pub hint: u16,
}

impl From<SubmitTaskRequest> for TaskSpec {
    fn from(req: SubmitTaskRequest) -> Self {
        Self {
            task_type: req.task_type,
            parameters: req.parameters,
            priority: req.priority,
            deadline_ms: req.deadline_ms,
            requirements: req
                .requirements
                .into_iter()
                .map(|(kind, qty)| (ResourceKind::from(kind), qty))
                .collect(),
            depends_on: req.depends_on,
            hint: req.hint,
        }
    }
}

/// One member of a plan submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTaskRequest {
    /// Plan-local key.
    pub key: String,
    /// Task payload.
    #[serde(flatten)]
    pub task: SubmitTaskRequest,
}

/// Plan submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPlanRequest {
    /// Client-chosen plan id.
    pub plan_id: String,
    /// Members.
    pub tasks: Vec<PlanTaskRequest>,
    /// Edges; `from` completes before `to` starts.
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl From<SubmitPlanRequest> for PlanSpec {
    fn from(req: SubmitPlanRequest) -> Self {
        Self {
            plan_id: PlanId::new(req.plan_id),
            tasks: req
                .tasks
                .into_iter()
                .map(|t| PlanMember {
                    key: t.key,
                    spec: t.task.into(),
                })
                .collect(),
            edges: req.edges,
        }
    }
}

/// Task status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Result, once completed.
    pub result: Option<Value>,
    /// Error, once failed or cancelled.
    pub error: Option<TaskError>,
    /// Handler invocations so far.
    pub attempts: u32,
    /// Owning plan.
    pub plan_id: Option<PlanId>,
    /// Plan-local key.
    pub plan_key: Option<String>,
}

impl From<&TaskRecord> for TaskStatusResponse {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id,
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
            attempts: record.attempts,
            plan_id: record.plan_id.clone(),
            plan_key: record.plan_key.clone(),
        }
    }
}

/// Plan status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStatusResponse {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Derived status.
    pub status: PlanStatus,
    /// Member statuses in declaration order.
    pub members: Vec<TaskStatusResponse>,
    /// Consolidated result, once every member is terminal.
    pub result: Option<PlanResult>,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub kind: ErrorKind,
    /// Whether the referenced entity does not exist.
    #[serde(default)]
    pub not_found: bool,
    /// Human-readable detail.
    pub message: String,
}

impl From<OrchestratorError> for ErrorResponse {
    fn from(err: OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            not_found: matches!(err, OrchestratorError::NotFound(_)),
            message: err.to_string(),
        }
    }
}

/// Utilization of one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceHealth {
    /// Fixed capacity.
    pub capacity: u32,
    /// Units currently reserved.
    pub allocated: u32,
    /// Allocated fraction in `[0, 1]`.
    pub utilization: f64,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Worker threads.
    pub workers: usize,
    /// Tasks waiting for a worker.
    pub queue_depth: usize,
    /// Tasks waiting for resources.
    pub parked: usize,
    /// Tasks waiting on dependencies.
    pub waiting: usize,
    /// Tasks running.
    pub running: usize,
    /// Retained completed tasks.
    pub completed: usize,
    /// Retained failed tasks.
    pub failed: usize,
    /// Retained cancelled tasks.
    pub cancelled: usize,
    /// Submissions rejected since start.
    pub rejected: u64,
    /// Per-kind utilization.
    pub resources: BTreeMap<ResourceKind, ResourceHealth>,
}

/// Submit a task.
///
/// # Errors
///
/// Admission rejections, as an [`ErrorResponse`].
pub fn submit_task(
    orchestrator: &Orchestrator,
    req: SubmitTaskRequest,
) -> Result<SubmitReceipt, ErrorResponse> {
    Ok(orchestrator.submit_task(req.into())?)
}

/// Submit a plan.
///
/// # Errors
///
/// Validation, cycle, or capacity rejections, as an [`ErrorResponse`].
pub fn submit_plan(
    orchestrator: &Orchestrator,
    req: SubmitPlanRequest,
) -> Result<PlanReceipt, ErrorResponse> {
    Ok(orchestrator.submit_plan(req.into())?)
}

/// Status of one task.
///
/// # Errors
///
/// Unknown task, as an [`ErrorResponse`] with `not_found` set.
pub fn task_status(
    orchestrator: &Orchestrator,
    task_id: TaskId,
) -> Result<TaskStatusResponse, ErrorResponse> {
    let record = orchestrator.task_status(task_id)?;
    Ok(TaskStatusResponse::from(&record))
}

/// Status of a plan, with its consolidated result once terminal.
///
/// # Errors
///
/// Unknown plan, as an [`ErrorResponse`] with `not_found` set.
pub fn plan_status(
    orchestrator: &Orchestrator,
    plan_id: &PlanId,
) -> Result<PlanStatusResponse, ErrorResponse> {
    let snapshot = orchestrator.plan_status(plan_id)?;
    let result = orchestrator.consolidate(plan_id)?;
    Ok(PlanStatusResponse {
        plan_id: snapshot.plan_id,
        status: snapshot.status,
        members: snapshot.members.iter().map(TaskStatusResponse::from).collect(),
        result,
    })
}

/// Cancel a task.
///
/// # Errors
///
/// Unknown task, as an [`ErrorResponse`] with `not_found` set.
pub fn cancel_task(
    orchestrator: &Orchestrator,
    task_id: TaskId,
) -> Result<TaskStatusResponse, ErrorResponse> {
    orchestrator.cancel_task(task_id)?;
    task_status(orchestrator, task_id)
}

/// Cancel every live member of a plan and report the plan afterwards.
///
/// # Errors
///
/// Unknown plan, as an [`ErrorResponse`] with `not_found` set.
pub fn cancel_plan(
    orchestrator: &Orchestrator,
    plan_id: &PlanId,
) -> Result<PlanStatusResponse, ErrorResponse> {
    orchestrator.cancel_plan(plan_id)?;
    plan_status(orchestrator, plan_id)
}

/// Return a health payload.
#[must_use]
pub fn health(orchestrator: &Orchestrator) -> Health {
    let stats = orchestrator.stats();
    let resources = stats
        .resources
        .iter()
        .map(|(kind, usage)| {
            let health = ResourceHealth {
                capacity: usage.capacity,
                allocated: usage.allocated,
                utilization: usage.utilization(),
            };
            (kind.clone(), health)
        })
        .collect();
    Health {
        ok: stats.worker_count > 0,
        workers: stats.worker_count,
        queue_depth: stats.queue_depth,
        parked: stats.parked,
        waiting: stats.waiting,
        running: stats.running,
        completed: stats.completed,
        failed: stats.failed,
        cancelled: stats.cancelled,
        rejected: stats.rejected,
        resources,
    }
}
