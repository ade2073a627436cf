//! Serializable identifiers and scheduling primitives shared across modules.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique task identifier, generated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-supplied identifier of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    /// Wrap a plan name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlanId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlanId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task priority. Higher values are more urgent.
pub type Priority = i32;

/// Named kind of finite resource tracked by the pool (`compute`, `memory`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    /// Create a resource kind from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Compute slots.
    #[must_use]
    pub fn compute() -> Self {
        Self::new("compute")
    }

    /// Memory units.
    #[must_use]
    pub fn memory() -> Self {
        Self::new("memory")
    }

    /// Accelerator (GPU/TPU) units.
    #[must_use]
    pub fn accelerator() -> Self {
        Self::new("accelerator")
    }

    /// Borrow the kind name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKind {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quantity required per resource kind.
pub type ResourceRequirements = BTreeMap<ResourceKind, u32>;

/// Build a requirements map from `(kind, quantity)` pairs.
///
/// ```
/// use prometheus_orchestrator::util::requirements;
///
/// let req = requirements([("compute", 2), ("memory", 512)]);
/// assert_eq!(req.len(), 2);
/// ```
pub fn requirements<I, K>(items: I) -> ResourceRequirements
where
    I: IntoIterator<Item = (K, u32)>,
    K: Into<ResourceKind>,
{
    items.into_iter().map(|(k, q)| (k.into(), q)).collect()
}
