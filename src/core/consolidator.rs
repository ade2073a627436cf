//! Plan-level result consolidation.
//!
//! The consolidator only reads terminal task state; it never mutates records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{ErrorKind, TaskError};
use crate::core::task::{TaskRecord, TaskStatus};
use crate::util::serde::{PlanId, TaskId};

/// Status of a plan, derived from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// At least one member is not terminal.
    InProgress,
    /// Every member completed.
    Completed,
    /// Some members completed, others failed or were cancelled.
    Partial,
    /// No member completed.
    Failed,
}

impl PlanStatus {
    /// Whether every member is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// A member that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    /// Member task.
    pub task_id: TaskId,
    /// Plan-local key.
    pub key: Option<String>,
    /// Terminal status (`failed` or `cancelled`).
    pub status: TaskStatus,
    /// Recorded error.
    pub error: TaskError,
}

/// Merged outcome of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Overall status.
    pub status: PlanStatus,
    /// Results of completed members.
    pub results: BTreeMap<TaskId, Value>,
    /// Every member that failed or was cancelled, in plan order.
    pub failures: Vec<MemberFailure>,
}

impl PlanResult {
    /// Failure entry for a member.
    #[must_use]
    pub fn failure(&self, task_id: &TaskId) -> Option<&MemberFailure> {
        self.failures.iter().find(|f| &f.task_id == task_id)
    }
}

/// Merges member outcomes into a [`PlanResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultConsolidator;

impl ResultConsolidator {
    /// Create a consolidator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Derive the plan status from member records.
    pub fn status<'a>(&self, members: impl IntoIterator<Item = &'a TaskRecord>) -> PlanStatus {
        let mut completed = 0_usize;
        let mut unsuccessful = 0_usize;
        for record in members {
            match record.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed | TaskStatus::Cancelled => unsuccessful += 1,
                _ => return PlanStatus::InProgress,
            }
        }
        match (completed, unsuccessful) {
            (_, 0) => PlanStatus::Completed,
            (0, _) => PlanStatus::Failed,
            _ => PlanStatus::Partial,
        }
    }

    /// Merge member outcomes, or `None` while any member is still live.
    pub fn consolidate<'a>(
        &self,
        plan_id: &PlanId,
        members: impl IntoIterator<Item = &'a TaskRecord> + Clone,
    ) -> Option<PlanResult> {
        let status = self.status(members.clone());
        if !status.is_terminal() {
            return None;
        }

        let mut results = BTreeMap::new();
        let mut failures = Vec::new();
        for record in members {
            if record.status == TaskStatus::Completed {
                results.insert(record.id, record.result.clone().unwrap_or(Value::Null));
            } else {
                failures.push(MemberFailure {
                    task_id: record.id,
                    key: record.plan_key.clone(),
                    status: record.status,
                    error: record.error.clone().unwrap_or_else(|| {
                        TaskError::new(ErrorKind::Cancelled, "no error recorded")
                    }),
                });
            }
        }

        Some(PlanResult {
            plan_id: plan_id.clone(),
            status,
            results,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskSpec;
    use crate::util::serde::requirements;

    fn member(status: TaskStatus) -> TaskRecord {
        let spec = TaskSpec::new("echo", requirements([("compute", 1)]));
        let mut r = TaskRecord::from_spec(TaskId::new(), spec, 0, 0);
        r.status = status;
        match status {
            TaskStatus::Completed => r.result = Some(Value::from("ok")),
            TaskStatus::Failed => r.error = Some(TaskError::new(ErrorKind::Handler, "boom")),
            TaskStatus::Cancelled => {
                r.error = Some(TaskError::new(ErrorKind::Cancelled, "dependency failed"));
            }
            _ => {}
        }
        r
    }

    #[test]
    fn all_completed() {
        let members = [member(TaskStatus::Completed), member(TaskStatus::Completed)];
        let out = ResultConsolidator::new()
            .consolidate(&PlanId::from("p"), members.iter())
            .unwrap();
        assert_eq!(out.status, PlanStatus::Completed);
        assert_eq!(out.results.len(), 2);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn partial_keeps_successes_and_failures() {
        let members = [member(TaskStatus::Completed), member(TaskStatus::Failed)];
        let out = ResultConsolidator::new()
            .consolidate(&PlanId::from("p"), members.iter())
            .unwrap();
        assert_eq!(out.status, PlanStatus::Partial);
        assert_eq!(out.results[&members[0].id], Value::from("ok"));
        assert_eq!(out.failure(&members[1].id).unwrap().error.kind, ErrorKind::Handler);
    }

    #[test]
    fn nothing_completed_is_failed() {
        let members = [member(TaskStatus::Failed), member(TaskStatus::Cancelled)];
        let out = ResultConsolidator::new()
            .consolidate(&PlanId::from("p"), members.iter())
            .unwrap();
        assert_eq!(out.status, PlanStatus::Failed);
        assert_eq!(out.failures.len(), 2);
        assert_eq!(out.failures[1].status, TaskStatus::Cancelled);
    }

    #[test]
    fn live_member_defers_consolidation() {
        let members = [member(TaskStatus::Completed), member(TaskStatus::Running)];
        let consolidator = ResultConsolidator::new();
        assert_eq!(consolidator.status(members.iter()), PlanStatus::InProgress);
        assert!(consolidator
            .consolidate(&PlanId::from("p"), members.iter())
            .is_none());
    }
}
