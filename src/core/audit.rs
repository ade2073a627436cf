//! Audit trail of task lifecycle decisions.
//!
//! Sinks receive one event per admission decision and state change. The
//! in-memory sink keeps a bounded ring for inspection; the tracing sink
//! forwards events to the `audit` log target.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{PlanId, TaskId};

/// Lifecycle action recorded by the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Submission admitted.
    Admit,
    /// Submission rejected at admission.
    Reject,
    /// Dependencies satisfied and resources reserved.
    Ready,
    /// Handler invocation started.
    Start,
    /// Handler failed and will be retried.
    Retry,
    /// Task completed.
    Complete,
    /// Task failed.
    Fail,
    /// Task cancelled.
    Cancel,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admit => "admit",
            Self::Reject => "reject",
            Self::Ready => "ready",
            Self::Start => "start",
            Self::Retry => "retry",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Related task, absent for plan-level rejections.
    pub task_id: Option<TaskId>,
    /// Owning plan.
    pub plan_id: Option<PlanId>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);

    /// Events retained by the sink, oldest first. Sinks that forward events
    /// elsewhere return nothing.
    fn snapshot(&self) -> Vec<AuditEvent> {
        Vec::new()
    }
}

/// In-memory audit sink with a bounded buffer.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink keeping at most `max_events`.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(4096)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn snapshot(&self) -> Vec<AuditEvent> {
        self.events()
    }
}

/// Sink that emits every event on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            action = %event.action,
            task_id = ?event.task_id,
            plan_id = ?event.plan_id,
            detail = event.detail.as_deref().unwrap_or_default(),
            "audit event"
        );
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    task_id: Option<TaskId>,
    plan_id: Option<PlanId>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        task_id,
        plan_id,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
