//! Transport-agnostic API surface over the orchestrator.

pub mod api;

pub use api::{
    cancel_plan, cancel_task, health, plan_status, submit_plan, submit_task, task_status,
    ErrorResponse, Health, PlanStatusResponse, PlanTaskRequest, ResourceHealth, SubmitPlanRequest,
    SubmitTaskRequest, TaskStatusResponse,
};
