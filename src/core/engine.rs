//! Execution engine: worker threads driving the task state machine.
//!
//! Each worker is a dedicated OS thread with its own current-thread tokio
//! runtime, so handler work never blocks the caller's runtime. Idle workers
//! park on a `parking_lot::Condvar` until a task is ready.
//!
//! A separate sweeper thread ticks every `expiry_sweep`. It fails expired
//! tasks that have not started and signals running tasks past their
//! deadline. It also finalizes signalled tasks whose handler has not returned
//! within the grace period. A handler that blocks its worker thread therefore
//! still loses its reservation on time; its late result is discarded.
//!
//! All bookkeeping (task table, ready and parked queues, dependents) lives in
//! one `EngineState` behind a mutex. Handlers always run outside it. Lock
//! order is state, then pool, then audit/subscribers.
//!
//! A dependency-free task is either in `ready` (resources reserved, waiting
//! for a worker) or in `parked` (waiting for resources). Releasing resources
//! and promoting dependents happen inside the same critical section, so a
//! newly ready task always sees the post-release pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::consolidator::{PlanResult, ResultConsolidator};
use crate::core::error::{ErrorKind, HandlerError, OrchestratorError, OrchestratorResult, TaskError};
use crate::core::handler::{HandlerContext, HandlerRegistry};
use crate::core::plan::PlanRecord;
use crate::core::queue::{QueueEntry, TaskQueue};
use crate::core::resource_pool::ResourcePool;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Parameters, TaskRecord, TaskStatus, TaskTable};
use crate::infra::queue::InMemoryQueue;
use crate::util::clock::{now_ms, remaining_until};
use crate::util::serde::{PlanId, TaskId};

/// Lifecycle notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task that changed.
    pub task_id: TaskId,
    /// Owning plan.
    pub plan_id: Option<PlanId>,
    /// Status after the change.
    pub status: TaskStatus,
    /// Time of the change.
    pub at_ms: u128,
}

/// How a task left `running` (or a pre-running state).
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(Value),
    Failed(TaskError),
    /// `None` uses the reason stored with the cancellation request.
    Cancelled(Option<TaskError>),
}

pub(crate) struct RunningTask {
    token: CancellationToken,
    reason: Option<TaskError>,
    /// Set once signalled: the sweeper finalizes the task after this time.
    abandon_at_ms: Option<u128>,
}

impl RunningTask {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: None,
            abandon_at_ms: None,
        }
    }

    /// Cancel the handler and start its grace period. The first reason wins.
    fn signal(&mut self, reason: TaskError, now: u128, grace_ms: u128) {
        self.reason.get_or_insert(reason);
        self.token.cancel();
        self.abandon_at_ms.get_or_insert(now + grace_ms);
    }
}

/// Everything the engine mutates, guarded by one mutex.
#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) tasks: TaskTable,
    pub(crate) plans: HashMap<PlanId, PlanRecord>,
    pub(crate) ready: InMemoryQueue,
    pub(crate) parked: InMemoryQueue,
    pub(crate) dependents: HashMap<TaskId, Vec<TaskId>>,
    pub(crate) running: HashMap<TaskId, RunningTask>,
    pub(crate) next_seq: u64,
    pub(crate) shutdown: bool,
    pub(crate) submitted: u64,
    pub(crate) rejected: u64,
}

impl EngineState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// A task handed to a worker.
pub(crate) struct Dispatch {
    task_id: TaskId,
    task_type: String,
    parameters: Parameters,
    deadline_ms: Option<u128>,
    token: CancellationToken,
}

/// State shared between the facade and the workers.
pub(crate) struct Shared {
    pub(crate) state: Mutex<EngineState>,
    pub(crate) pool: Arc<ResourcePool>,
    pub(crate) registry: Arc<HandlerRegistry>,
    retry: RetryPolicy,
    cancel_grace: Duration,
    expiry_sweep: Duration,
    ready_cv: Condvar,
    terminal_cv: Condvar,
    sweep_cv: Condvar,
    audit: Mutex<Box<dyn AuditSink>>,
    subscribers: Mutex<Vec<Sender<TaskEvent>>>,
}

impl Shared {
    pub(crate) fn new(
        pool: Arc<ResourcePool>,
        registry: Arc<HandlerRegistry>,
        retry: RetryPolicy,
        cancel_grace: Duration,
        expiry_sweep: Duration,
        audit: Box<dyn AuditSink>,
    ) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            pool,
            registry,
            retry,
            cancel_grace,
            expiry_sweep,
            ready_cv: Condvar::new(),
            terminal_cv: Condvar::new(),
            sweep_cv: Condvar::new(),
            audit: Mutex::new(audit),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> crossbeam_channel::Receiver<TaskEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn audit_events(&self) -> Vec<crate::core::audit::AuditEvent> {
        self.audit.lock().snapshot()
    }

    /// Record an audit event and notify subscribers about `record`.
    pub(crate) fn emit(&self, record: &TaskRecord, action: AuditAction, detail: Option<String>) {
        self.audit.lock().record(build_audit_event(
            Some(record.id),
            record.plan_id.clone(),
            action,
            detail,
        ));
        let event = TaskEvent {
            task_id: record.id,
            plan_id: record.plan_id.clone(),
            status: record.status,
            at_ms: now_ms(),
        };
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Record an admission rejection.
    pub(crate) fn audit_reject(&self, plan_id: Option<PlanId>, err: &OrchestratorError) {
        self.audit.lock().record(build_audit_event(
            None,
            plan_id,
            AuditAction::Reject,
            Some(err.to_string()),
        ));
    }

    /// Wake one idle worker.
    pub(crate) fn notify_ready(&self) {
        self.ready_cv.notify_one();
    }

    /// Block until a task is ready to run, or return `None` on shutdown.
    fn dequeue_ready(&self) -> Option<Dispatch> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(dispatch) = self.next_dispatch(&mut state) {
                return Some(dispatch);
            }
            self.ready_cv.wait(&mut state);
        }
    }

    /// Pop the next ready task and move it to `running`.
    fn next_dispatch(&self, state: &mut EngineState) -> Option<Dispatch> {
        let now = now_ms();
        while let Some(entry) = state.ready.pop_next() {
            let Some(record) = state.tasks.get_mut(&entry.task_id) else {
                continue;
            };
            if record.is_expired(now) {
                self.finalize_locked(
                    state,
                    entry.task_id,
                    Outcome::Failed(TaskError::new(ErrorKind::Timeout, "deadline passed before start")),
                    now,
                );
                continue;
            }
            if let Err(err) = record.transition(TaskStatus::Running, now) {
                error!(task_id = %entry.task_id, error = %err, "dequeued task cannot start");
                continue;
            }

            let token = CancellationToken::new();
            let dispatch = Dispatch {
                task_id: record.id,
                task_type: record.task_type.clone(),
                parameters: record.parameters.clone(),
                deadline_ms: record.deadline_ms,
                token: token.clone(),
            };
            self.emit(record, AuditAction::Start, None);
            state.running.insert(entry.task_id, RunningTask::new(token));
            return Some(dispatch);
        }
        None
    }

    fn grace_ms(&self) -> u128 {
        self.cancel_grace.as_millis()
    }

    /// Enforce deadlines and grace periods. Fails every non-running live task
    /// whose deadline passed, signals running tasks past their deadline, and
    /// finalizes signalled tasks whose grace period ran out. Returns the
    /// number of tasks finalized.
    pub(crate) fn sweep_expired_locked(&self, state: &mut EngineState, now: u128) -> usize {
        let expired: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|r| !r.is_terminal() && r.status != TaskStatus::Running && r.is_expired(now))
            .map(|r| r.id)
            .collect();
        for id in &expired {
            warn!(task_id = %id, "deadline passed before start");
            self.finalize_locked(
                state,
                *id,
                Outcome::Failed(TaskError::new(ErrorKind::Timeout, "deadline passed before start")),
                now,
            );
        }

        let grace_ms = self.grace_ms();
        let tasks = &state.tasks;
        for (id, running) in &mut state.running {
            if running.abandon_at_ms.is_none() && tasks.get(id).is_some_and(|r| r.is_expired(now)) {
                warn!(task_id = %id, "deadline passed while running");
                running.signal(
                    TaskError::new(ErrorKind::Timeout, "deadline passed while running"),
                    now,
                    grace_ms,
                );
            }
        }

        let abandoned: Vec<TaskId> = state
            .running
            .iter()
            .filter(|(_, r)| r.abandon_at_ms.is_some_and(|at| now >= at))
            .map(|(id, _)| *id)
            .collect();
        for id in &abandoned {
            warn!(task_id = %id, "handler did not stop within grace period, abandoning it");
            self.finalize_locked(state, *id, Outcome::Cancelled(None), now);
        }
        expired.len() + abandoned.len()
    }

    /// Move `id` to a terminal state, release its resources, and propagate
    /// the outcome to dependents.
    pub(crate) fn finalize_locked(&self, state: &mut EngineState, id: TaskId, outcome: Outcome, now: u128) {
        let running = state.running.remove(&id);
        let outcome = match outcome {
            Outcome::Cancelled(None) => {
                let reason = running
                    .and_then(|r| r.reason)
                    .unwrap_or_else(|| TaskError::new(ErrorKind::Cancelled, "cancellation requested"));
                // A deadline signal ends the task as a timeout, not a cancellation.
                if reason.kind == ErrorKind::Timeout {
                    Outcome::Failed(reason)
                } else {
                    Outcome::Cancelled(Some(reason))
                }
            }
            other => other,
        };

        let Some(status) = self.terminate_locked(state, id, outcome, now) else {
            return;
        };
        if status == TaskStatus::Completed {
            self.promote_dependents(state, id, now);
        } else {
            self.cancel_dependents(state, id, now);
        }
        self.drain_parked(state);
        self.terminal_cv.notify_all();
    }

    /// Apply a terminal outcome to one record and release its reservation.
    fn terminate_locked(
        &self,
        state: &mut EngineState,
        id: TaskId,
        outcome: Outcome,
        now: u128,
    ) -> Option<TaskStatus> {
        state.ready.remove(&id);
        state.parked.remove(&id);
        let record = state.tasks.get_mut(&id)?;

        let (applied, action) = match outcome {
            Outcome::Completed(value) => (record.complete(value, now), AuditAction::Complete),
            Outcome::Failed(err) => (record.fail(err, now), AuditAction::Fail),
            Outcome::Cancelled(err) => (
                record.cancel(
                    err.unwrap_or_else(|| TaskError::new(ErrorKind::Cancelled, "cancelled")),
                    now,
                ),
                AuditAction::Cancel,
            ),
        };
        if let Err(err) = applied {
            debug!(task_id = %id, error = %err, "ignoring terminal transition");
            return None;
        }

        let detail = record.error.as_ref().map(ToString::to_string);
        info!(task_id = %id, status = %record.status, attempts = record.attempts, "task finished");
        self.emit(record, action, detail);

        if std::mem::take(&mut record.reserved) {
            if let Err(err) = self.pool.release(&record.requirements) {
                error!(task_id = %id, error = %err, "resource bookkeeping violated on release");
            }
        }
        Some(record.status)
    }

    /// Move dependents whose every dependency completed to the parked queue.
    fn promote_dependents(&self, state: &mut EngineState, id: TaskId, now: u128) {
        let Some(children) = state.dependents.get(&id).cloned() else {
            return;
        };
        for child in children {
            let satisfied = state.tasks.get(&child).is_some_and(|r| {
                r.status == TaskStatus::WaitingOnDependencies
                    && r.depends_on.iter().all(|dep| {
                        state
                            .tasks
                            .get(dep)
                            .is_some_and(|d| d.status == TaskStatus::Completed)
                    })
            });
            if !satisfied {
                continue;
            }
            let Some(record) = state.tasks.get_mut(&child) else {
                continue;
            };
            if let Err(err) = record.transition(TaskStatus::Admitted, now) {
                error!(task_id = %child, error = %err, "cannot promote dependent");
                continue;
            }
            debug!(task_id = %child, "dependencies satisfied");
            state.parked.enqueue(QueueEntry {
                task_id: child,
                key: record.scheduling_key(),
            });
        }
    }

    /// Cancel every live transitive dependent of a failed or cancelled task.
    fn cancel_dependents(&self, state: &mut EngineState, id: TaskId, now: u128) {
        let mut stack = vec![id];
        while let Some(parent) = stack.pop() {
            let children = state.dependents.get(&parent).cloned().unwrap_or_default();
            for child in children {
                let live = state
                    .tasks
                    .get(&child)
                    .is_some_and(|r| !r.is_terminal() && r.status != TaskStatus::Running);
                if !live {
                    continue;
                }
                let reason = TaskError::new(
                    ErrorKind::Cancelled,
                    format!("dependency {parent} did not complete"),
                );
                if self
                    .terminate_locked(state, child, Outcome::Cancelled(Some(reason)), now)
                    .is_some()
                {
                    stack.push(child);
                }
            }
        }
    }

    /// Reserve resources for parked tasks in queue order, stopping at the
    /// first one that does not fit.
    pub(crate) fn drain_parked(&self, state: &mut EngineState) {
        while let Some(entry) = state.parked.peek_next() {
            let Some(record) = state.tasks.get_mut(&entry.task_id) else {
                state.parked.pop_next();
                continue;
            };
            if self.pool.reserve(&record.requirements).is_err() {
                debug!(task_id = %entry.task_id, "insufficient capacity to wake next task");
                break;
            }
            record.reserved = true;
            self.emit(record, AuditAction::Ready, None);
            state.parked.pop_next();
            state.ready.enqueue(entry);
            self.ready_cv.notify_one();
        }
    }

    /// Request cancellation of one task.
    pub(crate) fn cancel_locked(
        &self,
        state: &mut EngineState,
        id: TaskId,
        reason: TaskError,
        now: u128,
    ) -> OrchestratorResult<TaskStatus> {
        let status = state
            .tasks
            .get(&id)
            .map(|r| r.status)
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {id}")))?;

        if status.is_terminal() {
            return Ok(status);
        }
        if status == TaskStatus::Running {
            let grace_ms = self.grace_ms();
            if let Some(running) = state.running.get_mut(&id) {
                running.signal(reason, now, grace_ms);
                info!(task_id = %id, "cancellation signalled to running handler");
            }
            return Ok(status);
        }
        self.finalize_locked(state, id, Outcome::Cancelled(Some(reason)), now);
        Ok(TaskStatus::Cancelled)
    }

    fn record_attempt(&self, id: TaskId, attempt: u32, last_error: Option<&HandlerError>) {
        let mut state = self.state.lock();
        if let Some(record) = state.tasks.get_mut(&id).filter(|r| !r.is_terminal()) {
            record.attempts = attempt;
            if let Some(err) = last_error {
                self.emit(record, AuditAction::Retry, Some(err.message.clone()));
            }
        }
    }

    /// Sweep on every `expiry_sweep` tick until shutdown has abandoned or
    /// finished every running task.
    fn run_sweeper(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown && state.running.is_empty() {
                return;
            }
            self.sweep_cv.wait_for(&mut state, self.expiry_sweep);
            let swept = self.sweep_expired_locked(&mut state, now_ms());
            if swept > 0 {
                debug!(swept, "sweep finalized tasks");
            }
        }
    }

    /// Finalize a task handed back by a worker. A task the sweeper already
    /// abandoned stays as it is.
    fn finish(&self, id: TaskId, outcome: Outcome) {
        let mut state = self.state.lock();
        self.finalize_locked(&mut state, id, outcome, now_ms());
    }

    /// Block until the plan is terminal or `timeout` elapses.
    pub(crate) fn wait_for_plan(
        &self,
        plan_id: &PlanId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<PlanResult>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(result) = consolidate_locked(&state, plan_id)? {
                return Ok(Some(result));
            }
            if self.terminal_cv.wait_until(&mut state, deadline).timed_out() {
                return consolidate_locked(&state, plan_id);
            }
        }
    }

    /// Block until the task is terminal or `timeout` elapses.
    pub(crate) fn wait_for_task(
        &self,
        id: TaskId,
        timeout: Duration,
    ) -> OrchestratorResult<Option<TaskRecord>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let record = state
                .tasks
                .get(&id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("task {id}")))?;
            if record.is_terminal() {
                return Ok(Some(record.clone()));
            }
            if self.terminal_cv.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.tasks.get(&id).filter(|r| r.is_terminal()).cloned());
            }
        }
    }

    /// Stop accepting work, cancel everything not yet running, and signal
    /// running handlers. Returns `false` if already shut down.
    pub(crate) fn signal_shutdown(&self) -> bool {
        let mut guard = self.state.lock();
        if guard.shutdown {
            return false;
        }
        guard.shutdown = true;
        let state: &mut EngineState = &mut guard;
        let now = now_ms();

        let grace_ms = self.grace_ms();
        for running in state.running.values_mut() {
            running.signal(
                TaskError::new(ErrorKind::Cancelled, "orchestrator shut down"),
                now,
                grace_ms,
            );
        }
        let pending: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|r| !r.is_terminal() && r.status != TaskStatus::Running)
            .map(|r| r.id)
            .collect();
        for id in pending {
            let reason = TaskError::new(ErrorKind::Cancelled, "orchestrator shut down");
            self.finalize_locked(state, id, Outcome::Cancelled(Some(reason)), now);
        }
        drop(guard);

        self.ready_cv.notify_all();
        self.terminal_cv.notify_all();
        self.sweep_cv.notify_all();
        true
    }

    /// Run one dispatched task to an outcome, honoring retries, cancellation,
    /// and the deadline.
    async fn execute(&self, dispatch: &Dispatch) -> Outcome {
        let Some(handler) = self.registry.get(&dispatch.task_type) else {
            return Outcome::Failed(TaskError::new(
                ErrorKind::Validation,
                format!("no handler registered for type `{}`", dispatch.task_type),
            ));
        };
        let token = &dispatch.token;

        let expiry = async {
            match dispatch.deadline_ms {
                Some(deadline) => {
                    if let Some(left) = remaining_until(deadline, now_ms()) {
                        tokio::time::sleep(left).await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut attempt = 0_u32;
        let mut last_error: Option<HandlerError> = None;
        loop {
            attempt += 1;
            self.record_attempt(dispatch.task_id, attempt, last_error.as_ref());

            let ctx = HandlerContext::new(
                dispatch.task_id,
                attempt,
                dispatch.deadline_ms,
                token.clone(),
            );
            let params = dispatch.parameters.clone();
            let task_handler = Arc::clone(&handler);
            let mut call = tokio::spawn(async move { task_handler.handle(params, ctx).await });

            let result = tokio::select! {
                joined = &mut call => match joined {
                    Ok(result) => result,
                    Err(err) => Err(HandlerError::permanent(format!("handler aborted: {err}"))),
                },
                () = token.cancelled() => {
                    self.wind_down(dispatch.task_id, call).await;
                    return Outcome::Cancelled(None);
                }
                () = &mut expiry => {
                    warn!(task_id = %dispatch.task_id, "deadline passed while running");
                    token.cancel();
                    self.wind_down(dispatch.task_id, call).await;
                    return Outcome::Failed(TaskError::new(ErrorKind::Timeout, "deadline passed while running"));
                }
            };

            match result {
                Ok(value) => return Outcome::Completed(value),
                // A handler that returns early on cancellation reports an error.
                Err(_) if token.is_cancelled() => return Outcome::Cancelled(None),
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        task_id = %dispatch.task_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "handler failed, retrying"
                    );
                    last_error = Some(err);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => return Outcome::Cancelled(None),
                        () = &mut expiry => {
                            token.cancel();
                            return Outcome::Failed(TaskError::new(ErrorKind::Timeout, "deadline passed while running"));
                        }
                    }
                }
                Err(err) => {
                    warn!(task_id = %dispatch.task_id, attempt, error = %err, "handler failed");
                    return Outcome::Failed(TaskError::new(ErrorKind::Handler, err.message));
                }
            }
        }
    }

    /// Give a signalled handler the grace period to return, then abort it.
    async fn wind_down(
        &self,
        task_id: TaskId,
        mut call: tokio::task::JoinHandle<Result<Value, HandlerError>>,
    ) {
        if tokio::time::timeout(self.cancel_grace, &mut call).await.is_err() {
            warn!(task_id = %task_id, "handler ignored cancellation within grace period");
            call.abort();
        }
    }
}

/// Consolidate a plan from locked state.
pub(crate) fn consolidate_locked(
    state: &EngineState,
    plan_id: &PlanId,
) -> OrchestratorResult<Option<PlanResult>> {
    let plan = state
        .plans
        .get(plan_id)
        .ok_or_else(|| OrchestratorError::NotFound(format!("plan {plan_id}")))?;
    let members: Vec<&TaskRecord> = plan
        .members
        .iter()
        .filter_map(|id| state.tasks.get(id))
        .collect();
    Ok(ResultConsolidator::new().consolidate(plan_id, members.iter().copied()))
}

/// Finalizes its task when dropped, so a worker that unwinds mid-task still
/// releases the task's resources.
struct Inflight<'a> {
    shared: &'a Shared,
    task_id: TaskId,
    outcome: Option<Outcome>,
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            Outcome::Failed(TaskError::new(
                ErrorKind::Handler,
                "worker aborted while running task",
            ))
        });
        self.shared.finish(self.task_id, outcome);
    }
}

/// Fixed pool of worker threads pulling from the ready queue.
pub struct ExecutionEngine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    worker_count: usize,
}

impl ExecutionEngine {
    pub(crate) fn start(shared: Arc<Shared>, worker_count: usize) -> OrchestratorResult<Self> {
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            match spawn_worker(worker_id, Arc::clone(&shared)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.signal_shutdown();
                    return Err(OrchestratorError::Internal(format!(
                        "failed to spawn worker {worker_id}: {err}"
                    )));
                }
            }
        }
        let sweeper = match spawn_sweeper(Arc::clone(&shared)) {
            Ok(handle) => handle,
            Err(err) => {
                shared.signal_shutdown();
                return Err(OrchestratorError::Internal(format!(
                    "failed to spawn sweeper: {err}"
                )));
            }
        };
        info!(worker_count, "execution engine started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            sweeper: Mutex::new(Some(sweeper)),
            worker_count,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Shut down gracefully: cancel pending work, signal running handlers,
    /// and join workers. Workers that do not exit in time are detached.
    pub fn shutdown(&self) {
        if !self.shared.signal_shutdown() {
            return;
        }
        info!("shutting down execution engine");

        let join_timeout = self.shared.cancel_grace + Duration::from_secs(2);
        let mut workers = self.workers.lock();
        for (idx, worker) in workers.drain(..).enumerate() {
            match join_within(worker, join_timeout) {
                Some(true) => debug!(worker_id = idx, "worker joined"),
                Some(false) => warn!(worker_id = idx, "worker panicked"),
                None => warn!(worker_id = idx, "worker did not exit within timeout, detaching"),
            }
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            if join_within(sweeper, join_timeout) != Some(true) {
                warn!("sweeper did not exit cleanly");
            }
        }
        info!(worker_count = self.worker_count, "execution engine stopped");
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck handler.
        if self.shared.signal_shutdown() {
            debug!("execution engine dropped without explicit shutdown, workers detached");
        }
    }
}

/// Join `handle` on a helper thread; `None` if it does not finish in time.
fn join_within(handle: JoinHandle<()>, timeout: Duration) -> Option<bool> {
    let (tx, rx) = std::sync::mpsc::channel();
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });
    let joined = rx.recv_timeout(timeout).ok();
    drop(joiner);
    joined
}

fn spawn_sweeper(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("orch-sweeper".to_string())
        .spawn(move || {
            debug!("sweeper started");
            shared.run_sweeper();
            debug!("sweeper exiting");
        })
}

fn spawn_worker(worker_id: usize, shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("orch-worker-{worker_id}"))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    error!(worker_id, error = %err, "failed to create worker runtime");
                    return;
                }
            };
            debug!(worker_id, "worker started");

            while let Some(dispatch) = shared.dequeue_ready() {
                let mut inflight = Inflight {
                    shared: &shared,
                    task_id: dispatch.task_id,
                    outcome: None,
                };
                debug!(worker_id, task_id = %dispatch.task_id, "worker executing task");
                inflight.outcome = Some(rt.block_on(shared.execute(&dispatch)));
            }
            debug!(worker_id, "worker exiting");
        })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::task::TaskSpec;
    use crate::util::serde::{requirements, ResourceKind};

    fn shared(compute: u32) -> Shared {
        Shared::new(
            Arc::new(ResourcePool::new([(ResourceKind::compute(), compute)])),
            Arc::new(HandlerRegistry::new()),
            RetryPolicy::no_retry(),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Box::new(InMemoryAuditSink::new(64)),
        )
    }

    fn insert(state: &mut EngineState, compute: u32, priority: i32, deps: Vec<TaskId>) -> TaskId {
        let id = TaskId::new();
        let spec = TaskSpec::new("noop", requirements([("compute", compute)]))
            .with_priority(priority)
            .depends_on(deps.clone());
        let seq = state.next_seq();
        let mut record = TaskRecord::from_spec(id, spec, seq, 0);
        record.transition(TaskStatus::Admitted, 0).unwrap();
        if !deps.is_empty() {
            record.transition(TaskStatus::WaitingOnDependencies, 0).unwrap();
        }
        for dep in &deps {
            state.dependents.entry(*dep).or_default().push(id);
        }
        state.tasks.insert(record);
        id
    }

    fn park(state: &mut EngineState, id: TaskId) {
        let key = state.tasks.get(&id).unwrap().scheduling_key();
        state.parked.enqueue(QueueEntry { task_id: id, key });
    }

    #[test]
    fn parked_queue_wakes_in_order_and_stops_at_first_misfit() {
        let shared = shared(3);
        let mut state = shared.state.lock();
        let big = insert(&mut state, 3, 9, vec![]);
        let small = insert(&mut state, 1, 1, vec![]);
        park(&mut state, big);
        park(&mut state, small);

        let one = requirements([("compute", 1)]);
        shared.pool.reserve(&one).unwrap();
        shared.drain_parked(&mut state);
        // `big` heads the queue and does not fit; `small` waits behind it.
        assert_eq!(state.parked.len(), 2);
        assert!(state.ready.is_empty());

        shared.pool.release(&one).unwrap();
        shared.drain_parked(&mut state);
        assert_eq!(state.ready.peek_next().map(|e| e.task_id), Some(big));
        assert_eq!(state.parked.peek_next().map(|e| e.task_id), Some(small));
        assert!(state.tasks.get(&big).unwrap().reserved);
    }

    #[test]
    fn completion_promotes_and_failure_cascades_with_single_release() {
        let shared = shared(2);
        let mut guard = shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let compute = ResourceKind::compute();

        let root = insert(state, 1, 0, vec![]);
        shared.pool.reserve(&requirements([("compute", 1)])).unwrap();
        let record = state.tasks.get_mut(&root).unwrap();
        record.reserved = true;
        record.transition(TaskStatus::Running, 1).unwrap();
        let child = insert(state, 2, 0, vec![root]);
        let grandchild = insert(state, 1, 0, vec![child]);

        shared.finalize_locked(state, root, Outcome::Completed(Value::Null), 5);
        assert_eq!(shared.pool.allocated(&compute), 2);
        assert_eq!(state.ready.peek_next().map(|e| e.task_id), Some(child));
        assert_eq!(
            state.tasks.get(&grandchild).unwrap().status,
            TaskStatus::WaitingOnDependencies
        );

        let boom = TaskError::new(ErrorKind::Handler, "boom");
        shared.finalize_locked(state, child, Outcome::Failed(boom.clone()), 6);
        assert_eq!(shared.pool.allocated(&compute), 0);
        assert!(state.ready.is_empty());

        let cancelled = state.tasks.get(&grandchild).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        let err = cancelled.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(err.message.contains(&child.to_string()));

        // A second finalization is ignored and releases nothing.
        shared.finalize_locked(state, child, Outcome::Failed(boom), 7);
        assert_eq!(shared.pool.allocated(&compute), 0);
        assert_eq!(state.tasks.get(&child).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn sweep_fails_expired_waiting_tasks() {
        let shared = shared(1);
        let mut guard = shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let root = insert(state, 1, 0, vec![]);
        let id = TaskId::new();
        let spec = TaskSpec::new("noop", requirements([("compute", 1)]))
            .with_deadline_ms(50)
            .depends_on([root]);
        let mut record = TaskRecord::from_spec(id, spec, state.next_seq(), 0);
        record.transition(TaskStatus::Admitted, 0).unwrap();
        record.transition(TaskStatus::WaitingOnDependencies, 0).unwrap();
        state.tasks.insert(record);

        assert_eq!(shared.sweep_expired_locked(state, 49), 0);
        assert_eq!(shared.sweep_expired_locked(state, 50), 1);
        let expired = state.tasks.get(&id).unwrap();
        assert_eq!(expired.status, TaskStatus::Failed);
        assert_eq!(expired.error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(state.tasks.get(&root).unwrap().status, TaskStatus::Admitted);
    }

    #[test]
    fn sweep_abandons_running_task_after_grace_and_ignores_late_finish() {
        let shared = shared(1);
        let compute = ResourceKind::compute();
        let id = TaskId::new();
        let token = CancellationToken::new();
        {
            let mut guard = shared.state.lock();
            let state: &mut EngineState = &mut guard;
            let spec = TaskSpec::new("noop", requirements([("compute", 1)])).with_deadline_ms(50);
            let mut record = TaskRecord::from_spec(id, spec, state.next_seq(), 0);
            record.transition(TaskStatus::Admitted, 0).unwrap();
            record.transition(TaskStatus::Running, 1).unwrap();
            shared.pool.reserve(&record.requirements).unwrap();
            record.reserved = true;
            state.tasks.insert(record);
            state.running.insert(id, RunningTask::new(token.clone()));

            // Past the deadline: signalled, still running, still reserved.
            assert_eq!(shared.sweep_expired_locked(state, 60), 0);
            assert!(token.is_cancelled());
            assert_eq!(state.tasks.get(&id).unwrap().status, TaskStatus::Running);
            assert_eq!(shared.pool.allocated(&compute), 1);

            // Grace of 10ms runs out.
            assert_eq!(shared.sweep_expired_locked(state, 69), 0);
            assert_eq!(shared.sweep_expired_locked(state, 70), 1);
            let record = state.tasks.get(&id).unwrap();
            assert_eq!(record.status, TaskStatus::Failed);
            assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Timeout);
            assert_eq!(shared.pool.allocated(&compute), 0);
        }

        shared.finish(id, Outcome::Completed(Value::Null));
        let state = shared.state.lock();
        assert_eq!(state.tasks.get(&id).unwrap().status, TaskStatus::Failed);
        assert!(state.tasks.get(&id).unwrap().result.is_none());
        assert_eq!(shared.pool.allocated(&compute), 0);
    }

    #[test]
    fn cancelled_running_task_is_abandoned_as_cancelled() {
        let shared = shared(1);
        let mut guard = shared.state.lock();
        let state: &mut EngineState = &mut guard;
        let id = insert(state, 1, 0, vec![]);
        shared.pool.reserve(&requirements([("compute", 1)])).unwrap();
        let record = state.tasks.get_mut(&id).unwrap();
        record.reserved = true;
        record.transition(TaskStatus::Running, 1).unwrap();
        state.running.insert(id, RunningTask::new(CancellationToken::new()));

        let reason = TaskError::new(ErrorKind::Cancelled, "stop");
        assert_eq!(shared.cancel_locked(state, id, reason, 100).unwrap(), TaskStatus::Running);
        assert_eq!(shared.sweep_expired_locked(state, 110), 1);
        let record = state.tasks.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.error.as_ref().unwrap().message, "stop");
        assert_eq!(shared.pool.allocated(&ResourceKind::compute()), 0);
    }
}
