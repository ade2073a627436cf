//! Admission control: validate a submission and reserve its resources, or
//! reject it before it ever reaches a queue.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::handler::HandlerRegistry;
use crate::core::resource_pool::ResourcePool;
use crate::core::task::TaskSpec;
use crate::util::serde::ResourceRequirements;

/// Result of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Resources were reserved; the task may be queued for dispatch.
    Reserved,
    /// Dependencies are pending; resources are reserved when the last one
    /// completes.
    Deferred,
}

/// Validates submissions against the handler registry and the pool.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    pool: Arc<ResourcePool>,
    registry: Arc<HandlerRegistry>,
}

impl AdmissionController {
    /// Create a controller over a pool and registry.
    #[must_use]
    pub const fn new(pool: Arc<ResourcePool>, registry: Arc<HandlerRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Check the shape of a submission. Touches no resource.
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Validation`] for an unknown handler type,
    ///   malformed requirements, or a deadline that already passed.
    /// * [`OrchestratorError::InsufficientResources`] when a requirement
    ///   exceeds the pool's total capacity.
    pub fn validate(&self, spec: &TaskSpec, now_ms: u128) -> OrchestratorResult<()> {
        if spec.task_type.trim().is_empty() {
            return Err(OrchestratorError::Validation("task type must not be empty".into()));
        }
        if !self.registry.contains(&spec.task_type) {
            return Err(OrchestratorError::Validation(format!(
                "no handler registered for type `{}`",
                spec.task_type
            )));
        }
        self.pool.validate(&spec.requirements)?;
        if let Some(deadline) = spec.deadline_ms {
            if deadline <= now_ms {
                return Err(OrchestratorError::Validation(format!(
                    "deadline {deadline} already passed"
                )));
            }
        }
        self.pool.fits_capacity(&spec.requirements)
    }

    /// Admit a single task.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::validate`], or
    /// [`OrchestratorError::InsufficientResources`] when the task is
    /// dependency-free and the pool cannot satisfy it now.
    pub fn admit(
        &self,
        spec: &TaskSpec,
        dependencies_satisfied: bool,
        now_ms: u128,
    ) -> OrchestratorResult<Admission> {
        if let Err(err) = self.validate(spec, now_ms) {
            warn!(task_type = %spec.task_type, error = %err, "submission rejected");
            return Err(err);
        }
        if !dependencies_satisfied {
            debug!(task_type = %spec.task_type, "admitted with pending dependencies");
            return Ok(Admission::Deferred);
        }
        // Availability check and reservation happen under one pool lock.
        self.pool.reserve(&spec.requirements).inspect_err(|err| {
            warn!(task_type = %spec.task_type, error = %err, "submission rejected");
        })?;
        Ok(Admission::Reserved)
    }

    /// Reserve several already-validated requirement sets all-or-nothing.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InsufficientResources`]; nothing is reserved.
    pub fn admit_group(&self, reqs: &[&ResourceRequirements]) -> OrchestratorResult<()> {
        self.pool.reserve_all(reqs).inspect_err(|err| {
            warn!(members = reqs.len(), error = %err, "group reservation rejected");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serde::{requirements, ResourceKind};

    fn controller() -> (AdmissionController, Arc<ResourcePool>) {
        let pool = Arc::new(ResourcePool::new([(ResourceKind::compute(), 2)]));
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("echo", |_, _| async { Ok(serde_json::Value::Null) });
        (AdmissionController::new(Arc::clone(&pool), registry), pool)
    }

    #[test]
    fn unknown_handler_is_rejected_without_touching_pool() {
        let (ctl, pool) = controller();
        let spec = TaskSpec::new("missing", requirements([("compute", 1)]));
        let err = ctl.admit(&spec, true, 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert_eq!(pool.allocated(&ResourceKind::compute()), 0);
    }

    #[test]
    fn expired_deadline_is_rejected() {
        let (ctl, _) = controller();
        let spec = TaskSpec::new("echo", requirements([("compute", 1)])).with_deadline_ms(10);
        assert!(matches!(
            ctl.admit(&spec, true, 10),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn over_capacity_is_insufficient_resources() {
        let (ctl, _) = controller();
        let spec = TaskSpec::new("echo", requirements([("compute", 5)]));
        assert!(matches!(
            ctl.admit(&spec, false, 0),
            Err(OrchestratorError::InsufficientResources { requested: 5, available: 2, .. })
        ));
    }

    #[test]
    fn ready_task_reserves_and_exhaustion_rejects() {
        let (ctl, pool) = controller();
        let spec = TaskSpec::new("echo", requirements([("compute", 2)]));
        assert_eq!(ctl.admit(&spec, true, 0).unwrap(), Admission::Reserved);
        assert_eq!(pool.allocated(&ResourceKind::compute()), 2);
        assert!(matches!(
            ctl.admit(&spec, true, 0),
            Err(OrchestratorError::InsufficientResources { available: 0, .. })
        ));
    }

    #[test]
    fn deferred_task_reserves_nothing() {
        let (ctl, pool) = controller();
        let spec = TaskSpec::new("echo", requirements([("compute", 2)]));
        pool.reserve(&spec.requirements).unwrap();
        assert_eq!(ctl.admit(&spec, false, 0).unwrap(), Admission::Deferred);
        assert_eq!(pool.allocated(&ResourceKind::compute()), 2);
    }
}
