//! Core orchestration: admission, queueing, resources, dependency order,
//! execution, and result consolidation.

pub mod admission;
pub mod audit;
pub mod consolidator;
pub mod engine;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod plan;
pub mod queue;
pub mod resolver;
pub mod resource_pool;
pub mod retry;
pub mod task;

pub use admission::{Admission, AdmissionController};
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use consolidator::{MemberFailure, PlanResult, PlanStatus, ResultConsolidator};
pub use engine::{ExecutionEngine, TaskEvent};
pub use error::{AppResult, ErrorKind, HandlerError, OrchestratorError, OrchestratorResult, TaskError};
pub use handler::{FnHandler, HandlerContext, HandlerRegistry, HandlerResult, TaskHandler};
pub use orchestrator::{Orchestrator, OrchestratorStats, PlanReceipt, PlanSnapshot, SubmitReceipt};
pub use plan::{DependencyEdge, PlanMember, PlanRecord, PlanSpec};
pub use queue::{QueueEntry, TaskQueue};
pub use resolver::DependencyResolver;
pub use resource_pool::{ResourcePool, ResourceUsage};
pub use retry::RetryPolicy;
pub use task::{Parameters, SchedulingKey, TaskRecord, TaskSpec, TaskStatus};
