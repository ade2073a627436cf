//! Execution plans: batches of tasks submitted together with dependency edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::task::TaskSpec;
use crate::util::serde::{PlanId, TaskId};

/// One plan member, addressed by a plan-local key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMember {
    /// Plan-local key used by edges.
    pub key: String,
    /// Task submission.
    #[serde(flatten)]
    pub spec: TaskSpec,
}

/// Edge stating that `from` must complete before `to` starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Key of the prerequisite member.
    pub from: String,
    /// Key of the dependent member.
    pub to: String,
}

/// A plan submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Client-chosen identifier, unique per orchestrator.
    pub plan_id: PlanId,
    /// Members.
    pub tasks: Vec<PlanMember>,
    /// Dependency edges between members.
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl PlanSpec {
    /// Start an empty plan.
    pub fn new(plan_id: impl Into<PlanId>) -> Self {
        Self {
            plan_id: plan_id.into(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a member.
    #[must_use]
    pub fn task(mut self, key: impl Into<String>, spec: TaskSpec) -> Self {
        self.tasks.push(PlanMember {
            key: key.into(),
            spec,
        });
        self
    }

    /// Declare that `from` must complete before `to`.
    #[must_use]
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(DependencyEdge {
            from: from.into(),
            to: to.into(),
        });
        self
    }
}

/// The orchestrator's record of an admitted plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Identifier.
    pub plan_id: PlanId,
    /// Member tasks in layer order.
    pub members: Vec<TaskId>,
    /// Plan-local key to task id.
    pub keys: BTreeMap<String, TaskId>,
    /// Dependency layers; members of one layer may run concurrently.
    pub layers: Vec<Vec<TaskId>>,
    /// Submission time.
    pub submitted_at_ms: u128,
}

impl PlanRecord {
    /// Task id for a plan-local key.
    #[must_use]
    pub fn task_id(&self, key: &str) -> Option<TaskId> {
        self.keys.get(key).copied()
    }
}
