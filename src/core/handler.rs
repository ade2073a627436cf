//! Handler registration: the single extension point for task types.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::HandlerError;
use crate::core::task::Parameters;
use crate::util::serde::TaskId;

/// Outcome of one handler invocation.
pub type HandlerResult = Result<Value, HandlerError>;

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Absolute deadline, if any.
    pub deadline_ms: Option<u128>,
    cancel: CancellationToken,
}

impl HandlerContext {
    /// Build a context around a cancellation token.
    #[must_use]
    pub const fn new(
        task_id: TaskId,
        attempt: u32,
        deadline_ms: Option<u128>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            attempt,
            deadline_ms,
            cancel,
        }
    }

    /// Whether cancellation (explicit, timeout, or shutdown) was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Clone of the underlying token, for handing to sub-tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// An opaque task handler bound to a type tag.
///
/// Handlers should watch [`HandlerContext::cancelled`] and return promptly;
/// the engine waits only a bounded grace period after signalling.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_orchestrator::core::{HandlerContext, HandlerResult, Parameters, TaskHandler};
///
/// struct Inference;
///
/// #[async_trait]
/// impl TaskHandler for Inference {
///     async fn handle(&self, params: Parameters, _ctx: HandlerContext) -> HandlerResult {
///         Ok(serde_json::json!({ "model": params.get("model").cloned() }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute one attempt of a task.
    async fn handle(&self, params: Parameters, ctx: HandlerContext) -> HandlerResult;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Parameters, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, params: Parameters, ctx: HandlerContext) -> HandlerResult {
        (self.0)(params, ctx).await
    }
}

/// Type tag to handler map. Safe to register into while workers run.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `task_type` to `handler`, replacing any previous binding.
    pub fn register(&self, task_type: impl Into<String>, handler: impl TaskHandler) {
        self.register_arc(task_type, Arc::new(handler));
    }

    /// Bind `task_type` to a shared handler.
    pub fn register_arc(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        tracing::info!(task_type = %task_type, "handler registered");
        self.handlers.write().insert(task_type, handler);
    }

    /// Bind `task_type` to an async closure.
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Parameters, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(task_type, FnHandler::new(f));
    }

    /// Handler bound to `task_type`.
    #[must_use]
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    /// Whether `task_type` has a handler.
    #[must_use]
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Registered type tags, sorted.
    #[must_use]
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
