//! The orchestrator facade: submission, queries, cancellation, and waiting.
//!
//! Every admission runs under the engine state lock, so no two admissions
//! interleave and the pool never sees a reservation that state does not
//! know about.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::core::admission::{Admission, AdmissionController};
use crate::core::audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
use crate::core::consolidator::{PlanResult, PlanStatus, ResultConsolidator};
use crate::core::engine::{consolidate_locked, EngineState, ExecutionEngine, Outcome, Shared, TaskEvent};
use crate::core::error::{ErrorKind, OrchestratorError, OrchestratorResult, TaskError};
use crate::core::handler::{HandlerContext, HandlerRegistry, HandlerResult, TaskHandler};
use crate::core::plan::{PlanRecord, PlanSpec};
use crate::core::queue::{QueueEntry, TaskQueue};
use crate::core::resolver::DependencyResolver;
use crate::core::resource_pool::{ResourcePool, ResourceUsage};
use crate::core::task::{Parameters, SchedulingKey, TaskRecord, TaskSpec, TaskStatus};
use crate::util::clock::now_ms;
use crate::util::serde::{PlanId, ResourceKind, TaskId};

/// Acknowledgement of an admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Assigned identifier.
    pub task_id: TaskId,
    /// Status right after admission.
    pub status: TaskStatus,
}

/// Acknowledgement of an admitted plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReceipt {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Member ids in declaration order.
    pub member_task_ids: Vec<TaskId>,
    /// Plan-local key to task id.
    pub keys: BTreeMap<String, TaskId>,
    /// Dependency layers.
    pub layers: Vec<Vec<TaskId>>,
}

impl PlanReceipt {
    /// Task id for a plan-local key.
    #[must_use]
    pub fn task_id(&self, key: &str) -> Option<TaskId> {
        self.keys.get(key).copied()
    }
}

/// Point-in-time view of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Derived status.
    pub status: PlanStatus,
    /// Member records in declaration order.
    pub members: Vec<TaskRecord>,
    /// Dependency layers.
    pub layers: Vec<Vec<TaskId>>,
}

/// Counters and gauges describing the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    /// Worker threads.
    pub worker_count: usize,
    /// Tasks reserved and waiting for a worker.
    pub queue_depth: usize,
    /// Dependency-satisfied tasks waiting for resources.
    pub parked: usize,
    /// Tasks waiting on dependencies.
    pub waiting: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Completed tasks still retained.
    pub completed: usize,
    /// Failed tasks still retained.
    pub failed: usize,
    /// Cancelled tasks still retained.
    pub cancelled: usize,
    /// Tasks admitted since start.
    pub submitted: u64,
    /// Submissions rejected since start.
    pub rejected: u64,
    /// Per-kind capacity and allocation.
    pub resources: BTreeMap<ResourceKind, ResourceUsage>,
}

/// Resource-aware task orchestrator.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use prometheus_orchestrator::config::OrchestratorConfig;
/// use prometheus_orchestrator::core::{HandlerRegistry, Orchestrator, TaskSpec};
/// use prometheus_orchestrator::util::requirements;
///
/// let registry = Arc::new(HandlerRegistry::new());
/// registry.register_fn("echo", |params, _ctx| async move {
///     Ok(serde_json::Value::Object(params))
/// });
/// let config = OrchestratorConfig::new().with_resource("compute", 4);
/// let orchestrator = Orchestrator::new(config, registry)?;
///
/// let receipt = orchestrator
///     .submit_task(TaskSpec::new("echo", requirements([("compute", 1)])).with_param("x", 1))?;
/// let done = orchestrator.wait_for_task(receipt.task_id, Duration::from_secs(5))?;
/// assert!(done.is_some());
/// orchestrator.shutdown();
/// # Ok::<(), prometheus_orchestrator::core::OrchestratorError>(())
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    shared: Arc<Shared>,
    admission: AdmissionController,
    engine: ExecutionEngine,
}

impl Orchestrator {
    /// Start an orchestrator with an in-memory audit trail.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidConfig`] for an invalid configuration, or
    /// [`OrchestratorError::Internal`] if a worker thread cannot be spawned.
    pub fn new(config: OrchestratorConfig, registry: Arc<HandlerRegistry>) -> OrchestratorResult<Self> {
        let audit = Box::new(InMemoryAuditSink::new(config.audit_capacity));
        Self::with_audit(config, registry, audit)
    }

    /// Start an orchestrator recording lifecycle events into `audit`.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn with_audit(
        config: OrchestratorConfig,
        registry: Arc<HandlerRegistry>,
        audit: Box<dyn AuditSink>,
    ) -> OrchestratorResult<Self> {
        config.validate().map_err(OrchestratorError::InvalidConfig)?;

        let pool = Arc::new(ResourcePool::new(
            config
                .resources
                .iter()
                .map(|(kind, capacity)| (ResourceKind::new(kind.clone()), *capacity)),
        ));
        let shared = Arc::new(Shared::new(
            Arc::clone(&pool),
            Arc::clone(&registry),
            config.retry.policy(),
            config.cancel_grace(),
            config.expiry_sweep(),
            audit,
        ));
        let engine = ExecutionEngine::start(Arc::clone(&shared), config.worker_count)?;
        info!(
            workers = config.worker_count,
            resources = ?config.resources,
            "orchestrator started"
        );

        Ok(Self {
            admission: AdmissionController::new(pool, registry),
            config,
            shared,
            engine,
        })
    }

    /// Configuration this orchestrator was started with.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Handler registry shared with the workers.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.shared.registry
    }

    /// Bind a handler to a type tag.
    pub fn register_handler(&self, task_type: impl Into<String>, handler: impl TaskHandler) {
        self.shared.registry.register(task_type, handler);
    }

    /// Bind an async closure to a type tag.
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Parameters, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.registry.register_fn(task_type, f);
    }

    /// Submit a standalone task.
    ///
    /// A task with no pending dependency reserves its resources now or is
    /// rejected. A task whose dependency already failed or was cancelled is
    /// admitted straight to `cancelled`.
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Validation`] for a malformed submission or an
    ///   unknown dependency.
    /// * [`OrchestratorError::InsufficientResources`] when the pool cannot
    ///   satisfy the task.
    /// * [`OrchestratorError::Shutdown`] after shutdown.
    pub fn submit_task(&self, spec: TaskSpec) -> OrchestratorResult<SubmitReceipt> {
        let now = now_ms();
        let mut guard = self.shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let result = self.admit_task_locked(state, spec, now);
        if let Err(err) = &result {
            state.rejected += 1;
            self.shared.audit_reject(None, err);
        }
        result
    }

    fn admit_task_locked(
        &self,
        state: &mut EngineState,
        spec: TaskSpec,
        now: u128,
    ) -> OrchestratorResult<SubmitReceipt> {
        if state.shutdown {
            return Err(OrchestratorError::Shutdown);
        }

        let mut pending = false;
        let mut doomed = None;
        for dep in &spec.depends_on {
            let status = state
                .tasks
                .get(dep)
                .map(|r| r.status)
                .ok_or_else(|| OrchestratorError::Validation(format!("unknown dependency {dep}")))?;
            match status {
                TaskStatus::Completed => {}
                TaskStatus::Failed | TaskStatus::Cancelled => doomed = Some(*dep),
                _ => pending = true,
            }
        }

        let admission = self
            .admission
            .admit(&spec, !pending && doomed.is_none(), now)?;

        let id = TaskId::new();
        let seq = state.next_seq();
        let mut record = TaskRecord::from_spec(id, spec, seq, now);
        record.depends_on.sort_unstable();
        record.depends_on.dedup();
        record.transition(TaskStatus::Admitted, now)?;
        for dep in &record.depends_on {
            state.dependents.entry(*dep).or_default().push(id);
        }
        state.submitted += 1;
        self.shared.emit(&record, AuditAction::Admit, None);

        match admission {
            Admission::Reserved => self.enqueue_reserved(state, record),
            Admission::Deferred => {
                record.transition(TaskStatus::WaitingOnDependencies, now)?;
                state.tasks.insert(record);
                if let Some(dep) = doomed {
                    let reason = TaskError::new(
                        ErrorKind::Cancelled,
                        format!("dependency {dep} did not complete"),
                    );
                    self.shared
                        .finalize_locked(state, id, Outcome::Cancelled(Some(reason)), now);
                }
            }
        }

        let status = state
            .tasks
            .get(&id)
            .map_or(TaskStatus::Cancelled, |r| r.status);
        info!(task_id = %id, status = %status, "task admitted");
        Ok(SubmitReceipt { task_id: id, status })
    }

    fn enqueue_reserved(&self, state: &mut EngineState, mut record: TaskRecord) {
        record.reserved = true;
        let entry = QueueEntry {
            task_id: record.id,
            key: record.scheduling_key(),
        };
        self.shared.emit(&record, AuditAction::Ready, None);
        state.tasks.insert(record);
        state.ready.enqueue(entry);
        self.shared.notify_ready();
    }

    /// Submit a plan of tasks linked by dependency edges.
    ///
    /// The plan is validated as a whole: any malformed member, unknown edge
    /// endpoint, or cycle rejects it before anything is reserved. Root
    /// members reserve all-or-nothing; the rest reserve when their last
    /// dependency completes.
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Validation`] for a duplicate plan id, an empty
    ///   plan, a duplicate key, or a malformed member.
    /// * [`OrchestratorError::Cycle`] naming the members on a cycle.
    /// * [`OrchestratorError::InsufficientResources`] when the roots cannot
    ///   all be reserved now.
    /// * [`OrchestratorError::Shutdown`] after shutdown.
    pub fn submit_plan(&self, plan: PlanSpec) -> OrchestratorResult<PlanReceipt> {
        let now = now_ms();
        let plan_id = plan.plan_id.clone();
        let mut guard = self.shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let result = self.admit_plan_locked(state, plan, now);
        if let Err(err) = &result {
            state.rejected += 1;
            self.shared.audit_reject(Some(plan_id), err);
        }
        result
    }

    fn admit_plan_locked(
        &self,
        state: &mut EngineState,
        plan: PlanSpec,
        now: u128,
    ) -> OrchestratorResult<PlanReceipt> {
        if state.shutdown {
            return Err(OrchestratorError::Shutdown);
        }
        if state.plans.contains_key(&plan.plan_id) {
            return Err(OrchestratorError::Validation(format!(
                "plan {} already exists",
                plan.plan_id
            )));
        }
        if plan.tasks.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "plan {} has no tasks",
                plan.plan_id
            )));
        }
        for member in &plan.tasks {
            if !member.spec.depends_on.is_empty() {
                return Err(OrchestratorError::Validation(format!(
                    "plan member `{}` must declare dependencies as edges",
                    member.key
                )));
            }
            self.admission.validate(&member.spec, now)?;
        }

        let keys: Vec<String> = plan.tasks.iter().map(|m| m.key.clone()).collect();
        let edges: Vec<(String, String)> = plan
            .edges
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect();
        let order: HashMap<&str, SchedulingKey> = plan
            .tasks
            .iter()
            .zip(0_u64..)
            .map(|(m, idx)| {
                let key = SchedulingKey {
                    priority: m.spec.priority,
                    deadline_ms: m.spec.deadline_ms,
                    hint: m.spec.hint,
                    seq: idx,
                };
                (m.key.as_str(), key)
            })
            .collect();
        let layers = DependencyResolver::new().build_order(&keys, &edges, |a, b| {
            order.get(a.as_str()).cmp(&order.get(b.as_str()))
        })?;

        let roots: HashSet<&str> = layers
            .first()
            .map(|layer| layer.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let root_reqs: Vec<_> = plan
            .tasks
            .iter()
            .filter(|m| roots.contains(m.key.as_str()))
            .map(|m| &m.spec.requirements)
            .collect();
        self.admission.admit_group(&root_reqs)?;

        // Everything below is infallible bookkeeping; roots are reserved.
        let ids: BTreeMap<String, TaskId> =
            keys.iter().map(|k| (k.clone(), TaskId::new())).collect();
        let mut predecessors: HashMap<&str, Vec<TaskId>> = HashMap::new();
        for (from, to) in &edges {
            if let Some(&from_id) = ids.get(from) {
                let list = predecessors.entry(to.as_str()).or_default();
                if !list.contains(&from_id) {
                    list.push(from_id);
                }
            }
        }

        let layer_ids: Vec<Vec<TaskId>> = layers
            .iter()
            .map(|layer| layer.iter().filter_map(|k| ids.get(k).copied()).collect())
            .collect();
        let rank: HashMap<&str, usize> = layers
            .iter()
            .flatten()
            .enumerate()
            .map(|(rank, key)| (key.as_str(), rank))
            .collect();

        let mut members: Vec<(usize, TaskRecord)> = Vec::with_capacity(plan.tasks.len());
        let mut member_task_ids = Vec::with_capacity(plan.tasks.len());
        for member in plan.tasks {
            let Some(&id) = ids.get(&member.key) else {
                continue;
            };
            let deps = predecessors.remove(member.key.as_str()).unwrap_or_default();
            let mut spec = member.spec;
            spec.depends_on = deps;
            let mut record = TaskRecord::from_spec(id, spec, 0, now);
            record.plan_id = Some(plan.plan_id.clone());
            record.plan_key = Some(member.key.clone());
            record.transition(TaskStatus::Admitted, now)?;
            member_task_ids.push(id);
            members.push((rank.get(member.key.as_str()).copied().unwrap_or_default(), record));
        }
        // Sequence numbers follow layer order so queue ties match the plan.
        members.sort_by_key(|(rank, _)| *rank);

        for (_, mut record) in members {
            record.seq = state.next_seq();
            for dep in &record.depends_on {
                state.dependents.entry(*dep).or_default().push(record.id);
            }
            state.submitted += 1;
            self.shared.emit(&record, AuditAction::Admit, None);
            if record.depends_on.is_empty() {
                self.enqueue_reserved(state, record);
            } else {
                record.transition(TaskStatus::WaitingOnDependencies, now)?;
                state.tasks.insert(record);
            }
        }

        info!(
            plan_id = %plan.plan_id,
            members = member_task_ids.len(),
            layers = layer_ids.len(),
            "plan admitted"
        );
        state.plans.insert(
            plan.plan_id.clone(),
            PlanRecord {
                plan_id: plan.plan_id.clone(),
                members: member_task_ids.clone(),
                keys: ids.clone(),
                layers: layer_ids.clone(),
                submitted_at_ms: now,
            },
        );

        Ok(PlanReceipt {
            plan_id: plan.plan_id,
            member_task_ids,
            keys: ids,
            layers: layer_ids,
        })
    }

    /// Current record of a task.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown or purged task.
    pub fn task_status(&self, task_id: TaskId) -> OrchestratorResult<TaskRecord> {
        self.shared
            .state
            .lock()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))
    }

    /// Current view of a plan.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown or purged plan.
    pub fn plan_status(&self, plan_id: &PlanId) -> OrchestratorResult<PlanSnapshot> {
        let state = self.shared.state.lock();
        let plan = state
            .plans
            .get(plan_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("plan {plan_id}")))?;
        let members: Vec<TaskRecord> = plan
            .members
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect();
        Ok(PlanSnapshot {
            plan_id: plan_id.clone(),
            status: ResultConsolidator::new().status(&members),
            members,
            layers: plan.layers.clone(),
        })
    }

    /// Every retained task, optionally filtered by status, in submission
    /// order.
    #[must_use]
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let state = self.shared.state.lock();
        let mut records: Vec<TaskRecord> = state
            .tasks
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Cancel a task. Queued or waiting tasks are cancelled at once; a
    /// running handler is signalled and finalized by its worker within the
    /// grace period. Terminal tasks are left untouched.
    ///
    /// Returns the status right after the request.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown task.
    pub fn cancel_task(&self, task_id: TaskId) -> OrchestratorResult<TaskStatus> {
        let mut state = self.shared.state.lock();
        let reason = TaskError::new(ErrorKind::Cancelled, "cancelled by request");
        let status = self
            .shared
            .cancel_locked(&mut state, task_id, reason, now_ms())?;
        info!(task_id = %task_id, status = %status, "cancellation requested");
        Ok(status)
    }

    /// Cancel every live member of a plan. Returns how many members were
    /// cancelled or signalled.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown plan.
    pub fn cancel_plan(&self, plan_id: &PlanId) -> OrchestratorResult<usize> {
        let mut guard = self.shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let members = state
            .plans
            .get(plan_id)
            .map(|p| p.members.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("plan {plan_id}")))?;

        let now = now_ms();
        let mut affected = 0;
        for id in members {
            let live = state.tasks.get(&id).is_some_and(|r| !r.is_terminal());
            if !live {
                continue;
            }
            let reason = TaskError::new(ErrorKind::Cancelled, format!("plan {plan_id} cancelled"));
            self.shared.cancel_locked(state, id, reason, now)?;
            affected += 1;
        }
        info!(plan_id = %plan_id, affected, "plan cancellation requested");
        Ok(affected)
    }

    /// Plan result if every member is terminal, without blocking.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown plan.
    pub fn consolidate(&self, plan_id: &PlanId) -> OrchestratorResult<Option<PlanResult>> {
        consolidate_locked(&self.shared.state.lock(), plan_id)
    }

    /// Block until the plan is terminal; `None` if `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown plan.
    pub fn wait_for_plan(
        &self,
        plan_id: &PlanId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<PlanResult>> {
        self.shared.wait_for_plan(plan_id, timeout)
    }

    /// Async variant of [`Self::wait_for_plan`]; blocks a pool thread, not
    /// the caller's runtime.
    ///
    /// # Errors
    ///
    /// See [`Self::wait_for_plan`]; [`OrchestratorError::Internal`] if the
    /// blocking task is aborted.
    pub async fn wait_for_plan_async(
        &self,
        plan_id: PlanId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<PlanResult>> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.wait_for_plan(&plan_id, timeout))
            .await
            .map_err(|err| OrchestratorError::Internal(format!("wait task failed: {err}")))?
    }

    /// Block until the task is terminal; `None` if `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown task.
    pub fn wait_for_task(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<TaskRecord>> {
        self.shared.wait_for_task(task_id, timeout)
    }

    /// Async variant of [`Self::wait_for_task`].
    ///
    /// # Errors
    ///
    /// See [`Self::wait_for_task`].
    pub async fn wait_for_task_async(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<TaskRecord>> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.wait_for_task(task_id, timeout))
            .await
            .map_err(|err| OrchestratorError::Internal(format!("wait task failed: {err}")))?
    }

    /// Counters, gauges, and resource utilization.
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        let state = self.shared.state.lock();
        let mut stats = OrchestratorStats {
            worker_count: self.engine.worker_count(),
            queue_depth: state.ready.len(),
            parked: state.parked.len(),
            waiting: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            submitted: state.submitted,
            rejected: state.rejected,
            resources: self.shared.pool.usage(),
        };
        for record in state.tasks.iter() {
            match record.status {
                TaskStatus::WaitingOnDependencies => stats.waiting += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Queued | TaskStatus::Admitted => {}
            }
        }
        stats
    }

    /// Per-kind capacity and allocation.
    #[must_use]
    pub fn resource_usage(&self) -> BTreeMap<ResourceKind, ResourceUsage> {
        self.shared.pool.usage()
    }

    /// Receive a [`TaskEvent`] for every subsequent lifecycle change.
    #[must_use]
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<TaskEvent> {
        self.shared.subscribe()
    }

    /// Audit events retained by the sink.
    #[must_use]
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.shared.audit_events()
    }

    /// Fail every non-running task whose deadline has passed. Workers also
    /// do this whenever they idle; returns how many tasks expired.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.sweep_expired_locked(&mut state, now_ms())
    }

    /// Drop terminal records that ended before `cutoff_ms`.
    ///
    /// A plan is purged only once every member is terminal and ended before
    /// the cutoff. A standalone task is kept while any dependent is live.
    /// Returns the number of task records removed.
    pub fn purge_terminal_before(&self, cutoff_ms: u128) -> usize {
        let mut guard = self.shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let ended_before = |r: &TaskRecord| r.is_terminal() && r.ended_at_ms.is_some_and(|t| t < cutoff_ms);

        let expired_plans: Vec<PlanId> = state
            .plans
            .values()
            .filter(|plan| {
                plan.members
                    .iter()
                    .all(|id| state.tasks.get(id).is_none_or(ended_before))
            })
            .map(|plan| plan.plan_id.clone())
            .collect();
        for plan_id in &expired_plans {
            state.plans.remove(plan_id);
        }

        let mut doomed: HashSet<TaskId> = HashSet::new();
        for record in state.tasks.iter() {
            let purgeable = match &record.plan_id {
                Some(plan_id) => expired_plans.contains(plan_id),
                None => {
                    ended_before(record)
                        && state.dependents.get(&record.id).is_none_or(|children| {
                            children
                                .iter()
                                .all(|c| state.tasks.get(c).is_none_or(TaskRecord::is_terminal))
                        })
                }
            };
            if purgeable {
                doomed.insert(record.id);
            }
        }

        let removed = state.tasks.retain(|r| !doomed.contains(&r.id));
        state.dependents.retain(|id, _| !doomed.contains(id));
        debug!(removed, plans = expired_plans.len(), "purged terminal records");
        removed
    }

    /// Stop accepting work, cancel everything pending, signal running
    /// handlers, and join the workers.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
