//! Error types for admission, scheduling, and execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::serde::{ResourceKind, TaskId};

/// Errors returned synchronously by orchestrator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Malformed submission (unknown handler, bad requirements, bad edges).
    #[error("validation error: {0}")]
    Validation(String),
    /// Requirements cannot be satisfied by the pool right now.
    #[error("insufficient resources: {kind} requested {requested}, available {available}")]
    InsufficientResources {
        /// Resource kind that could not be satisfied.
        kind: ResourceKind,
        /// Quantity requested.
        requested: u32,
        /// Quantity free at the time of the check.
        available: u32,
    },
    /// Plan dependency edges contain a cycle among the listed members.
    #[error("dependency cycle among: {}", .0.join(", "))]
    Cycle(Vec<String>),
    /// Unknown task or plan.
    #[error("not found: {0}")]
    NotFound(String),
    /// Attempted a state transition the task state machine forbids.
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose record was targeted.
        task_id: TaskId,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
    /// Release would push an allocation below zero.
    #[error("release underflow on {kind}: allocated {allocated}, released {released}")]
    ReleaseUnderflow {
        /// Resource kind affected.
        kind: ResourceKind,
        /// Allocation at the time of the call.
        allocated: u32,
        /// Quantity the caller attempted to release.
        released: u32,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The orchestrator is shutting down and accepts no new work.
    #[error("orchestrator is shut down")]
    Shutdown,
    /// Internal failure (worker spawn failure, join error, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Map the synchronous error onto the user-visible error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientResources { .. } => ErrorKind::InsufficientResources,
            Self::Cycle(_) => ErrorKind::Cycle,
            Self::Shutdown => ErrorKind::Cancelled,
            _ => ErrorKind::Validation,
        }
    }
}

/// User-visible error taxonomy reported on task records and status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed submission. Never retried.
    Validation,
    /// Admission-time rejection for lack of capacity.
    InsufficientResources,
    /// Cyclic plan.
    Cycle,
    /// The registered handler returned an error after all attempts.
    Handler,
    /// The task deadline passed.
    Timeout,
    /// Explicit cancellation, shutdown, or failed dependency.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation_error",
            Self::InsufficientResources => "insufficient_resources",
            Self::Cycle => "cycle_error",
            Self::Handler => "handler_error",
            Self::Timeout => "timeout_error",
            Self::Cancelled => "cancellation_error",
        };
        f.write_str(s)
    }
}

/// Error recorded on a task that ended `failed` or `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl TaskError {
    /// Build a task error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Error raised by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Description of the failure.
    pub message: String,
    /// Whether the engine may invoke the handler again.
    pub retryable: bool,
}

impl HandlerError {
    /// A failure the engine may retry.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that must not be retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Library result type.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
