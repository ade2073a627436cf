//! Task specification, task record, status state machine, and the task arena.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{OrchestratorError, OrchestratorResult, TaskError};
use crate::util::serde::{PlanId, Priority, ResourceKind, ResourceRequirements, TaskId};

/// Opaque key/value payload handed to the handler.
pub type Parameters = serde_json::Map<String, Value>;

/// A task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Type tag selecting the registered handler.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Parameters passed verbatim to the handler.
    #[serde(default)]
    pub parameters: Parameters,
    /// Priority, higher runs first.
    #[serde(default)]
    pub priority: Priority,
    /// Optional absolute deadline in milliseconds since epoch.
    #[serde(default)]
    pub deadline_ms: Option<u128>,
    /// Resources held for the whole run.
    pub requirements: ResourceRequirements,
    /// Tasks that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Soft scheduling hint; breaks ties between otherwise equal tasks only.
    #[serde(default)]
    pub hint: u16,
}

impl TaskSpec {
    /// Create a spec for `task_type` needing `requirements`.
    pub fn new(task_type: impl Into<String>, requirements: ResourceRequirements) -> Self {
        Self {
            task_type: task_type.into(),
            parameters: Parameters::new(),
            priority: 0,
            deadline_ms: None,
            requirements,
            depends_on: Vec::new(),
            hint: 0,
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline_ms(mut self, deadline_ms: u128) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Add a single parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Declare dependencies on already-submitted tasks.
    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    /// Set the scheduling hint.
    #[must_use]
    pub const fn with_hint(mut self, hint: u16) -> Self {
        self.hint = hint;
        self
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record created, admission in progress.
    Queued,
    /// Admitted and dependency-free; waiting for resources or a worker.
    Admitted,
    /// Admitted but at least one dependency has not completed.
    WaitingOnDependencies,
    /// A worker is executing the handler.
    Running,
    /// Handler returned a result.
    Completed,
    /// Handler error or deadline expiry.
    Failed,
    /// Cancelled explicitly, by shutdown, or by a failed dependency.
    Cancelled,
}

impl TaskStatus {
    /// Terminal states accept no further mutation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Admitted, Cancelled, Completed, Failed, Queued, Running, WaitingOnDependencies};
        matches!(
            (self, next),
            (Queued, Admitted | Cancelled)
                | (Admitted, WaitingOnDependencies | Running | Failed | Cancelled)
                | (WaitingOnDependencies, Admitted | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::WaitingOnDependencies => "waiting_on_dependencies",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Total order used by the ready queue and for layer tie-breaking.
///
/// `a < b` means `a` is dispatched first: priority descending, deadline
/// ascending with deadline-less tasks last, hint descending, then submission
/// sequence ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulingKey {
    /// Task priority.
    pub priority: Priority,
    /// Absolute deadline.
    pub deadline_ms: Option<u128>,
    /// Scheduling hint.
    pub hint: u16,
    /// Monotonic submission sequence.
    pub seq: u64,
}

impl Ord for SchedulingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| match (self.deadline_ms, other.deadline_ms) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| other.hint.cmp(&self.hint))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SchedulingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The orchestrator's record of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Identifier.
    pub id: TaskId,
    /// Handler type tag.
    pub task_type: String,
    /// Handler parameters.
    pub parameters: Parameters,
    /// Priority.
    pub priority: Priority,
    /// Absolute deadline.
    pub deadline_ms: Option<u128>,
    /// Resource requirements.
    pub requirements: ResourceRequirements,
    /// Dependencies that must complete first.
    pub depends_on: Vec<TaskId>,
    /// Scheduling hint.
    pub hint: u16,
    /// Current status.
    pub status: TaskStatus,
    /// Handler result, set only on completion.
    pub result: Option<Value>,
    /// Error, set only on failure or cancellation.
    pub error: Option<TaskError>,
    /// Submission time.
    pub submitted_at_ms: u128,
    /// Time the task entered `running`.
    pub started_at_ms: Option<u128>,
    /// Time the task reached a terminal state.
    pub ended_at_ms: Option<u128>,
    /// Number of handler invocations.
    pub attempts: u32,
    /// Owning plan, if submitted as part of one.
    pub plan_id: Option<PlanId>,
    /// Plan-local key.
    pub plan_key: Option<String>,
    pub(crate) seq: u64,
    #[serde(skip)]
    pub(crate) reserved: bool,
}

impl TaskRecord {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec, seq: u64, now_ms: u128) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            parameters: spec.parameters,
            priority: spec.priority,
            deadline_ms: spec.deadline_ms,
            requirements: spec.requirements,
            depends_on: spec.depends_on,
            hint: spec.hint,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            submitted_at_ms: now_ms,
            started_at_ms: None,
            ended_at_ms: None,
            attempts: 0,
            plan_id: None,
            plan_key: None,
            seq,
            reserved: false,
        }
    }

    /// Ordering key of this task.
    #[must_use]
    pub const fn scheduling_key(&self) -> SchedulingKey {
        SchedulingKey {
            priority: self.priority,
            deadline_ms: self.deadline_ms,
            hint: self.hint,
            seq: self.seq,
        }
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the deadline has passed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u128) -> bool {
        self.deadline_ms.is_some_and(|d| d <= now_ms)
    }

    /// Move to `next`, stamping start/end times.
    pub(crate) fn transition(&mut self, next: TaskStatus, now_ms: u128) -> OrchestratorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                task_id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next == TaskStatus::Running {
            self.started_at_ms = Some(now_ms);
        }
        if next.is_terminal() {
            self.ended_at_ms = Some(now_ms);
        }
        Ok(())
    }

    pub(crate) fn complete(&mut self, result: Value, now_ms: u128) -> OrchestratorResult<()> {
        self.transition(TaskStatus::Completed, now_ms)?;
        self.result = Some(result);
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: TaskError, now_ms: u128) -> OrchestratorResult<()> {
        self.transition(TaskStatus::Failed, now_ms)?;
        self.error = Some(error);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, error: TaskError, now_ms: u128) -> OrchestratorResult<()> {
        self.transition(TaskStatus::Cancelled, now_ms)?;
        self.error = Some(error);
        Ok(())
    }

    /// Quantity of `kind` this task needs, zero if none.
    #[must_use]
    pub fn requirement(&self, kind: &ResourceKind) -> u32 {
        self.requirements.get(kind).copied().unwrap_or_default()
    }
}

/// Arena of task records indexed by id.
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    records: Vec<TaskRecord>,
    index: HashMap<TaskId, usize>,
}

impl TaskTable {
    pub(crate) fn insert(&mut self, record: TaskRecord) {
        let slot = self.records.len();
        self.index.insert(record.id, slot);
        self.records.push(record);
    }

    pub(crate) fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.index.get(id).map(|&slot| &self.records[slot])
    }

    pub(crate) fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.index.get(id).map(|&slot| &mut self.records[slot])
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter()
    }

    /// Keep only records matching `keep`; returns the number removed.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&TaskRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| keep(r));
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(slot, r)| (r.id, slot))
            .collect();
        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::util::serde::requirements;

    fn record() -> TaskRecord {
        let spec = TaskSpec::new("echo", requirements([("compute", 1)]));
        TaskRecord::from_spec(TaskId::new(), spec, 0, 10)
    }

    #[test]
    fn lifecycle_stamps_timestamps() {
        let mut r = record();
        r.transition(TaskStatus::Admitted, 11).unwrap();
        r.transition(TaskStatus::Running, 12).unwrap();
        r.complete(Value::from(7), 13).unwrap();
        assert_eq!(r.status, TaskStatus::Completed);
        assert_eq!(r.started_at_ms, Some(12));
        assert_eq!(r.ended_at_ms, Some(13));
        assert_eq!(r.result, Some(Value::from(7)));
    }

    #[test]
    fn terminal_records_reject_mutation() {
        let mut r = record();
        r.transition(TaskStatus::Admitted, 11).unwrap();
        r.cancel(TaskError::new(ErrorKind::Cancelled, "stop"), 12).unwrap();
        let err = r.transition(TaskStatus::Running, 13).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert!(r.complete(Value::Null, 14).is_err());
        assert_eq!(r.status, TaskStatus::Cancelled);
    }

    #[test]
    fn waiting_can_return_to_admitted_but_not_run_directly() {
        assert!(TaskStatus::WaitingOnDependencies.can_transition_to(TaskStatus::Admitted));
        assert!(!TaskStatus::WaitingOnDependencies.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Admitted));
    }

    #[test]
    fn scheduling_key_order() {
        let key = |priority, deadline_ms, seq| SchedulingKey {
            priority,
            deadline_ms,
            hint: 0,
            seq,
        };
        assert!(key(5, None, 9) < key(1, Some(1), 0));
        assert!(key(1, Some(10), 9) < key(1, Some(20), 0));
        assert!(key(1, Some(99), 9) < key(1, None, 0));
        assert!(key(1, None, 3) < key(1, None, 4));
    }

    #[test]
    fn table_retain_rebuilds_index() {
        let mut table = TaskTable::default();
        let a = record();
        let b = record();
        let (a_id, b_id) = (a.id, b.id);
        table.insert(a);
        table.insert(b);
        assert_eq!(table.retain(|r| r.id != a_id), 1);
        assert!(!table.contains(&a_id));
        assert_eq!(table.get(&b_id).map(|r| r.id), Some(b_id));
    }
}
