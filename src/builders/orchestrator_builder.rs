//! Builder assembling an [`Orchestrator`] from configuration, handlers, and
//! an audit sink.

use std::future::Future;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::core::{
    AppResult, AuditSink, HandlerContext, HandlerRegistry, HandlerResult, Orchestrator,
    OrchestratorResult, Parameters, TaskHandler, TracingAuditSink,
};

/// Build an orchestrator with the default in-memory audit trail.
///
/// # Errors
///
/// Invalid configuration or worker spawn failure.
pub fn build_orchestrator(
    cfg: OrchestratorConfig,
    registry: Arc<HandlerRegistry>,
) -> OrchestratorResult<Orchestrator> {
    OrchestratorBuilder::new(cfg).with_registry(registry).build()
}

/// Fluent builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: Arc<HandlerRegistry>,
    audit: Option<Box<dyn AuditSink>>,
}

impl OrchestratorBuilder {
    /// Start from a configuration with an empty registry.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            audit: None,
        }
    }

    /// Start from configuration read from the environment.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorConfig::from_env`].
    pub fn from_env() -> AppResult<Self> {
        Ok(Self::new(OrchestratorConfig::from_env()?))
    }

    /// Use an existing registry; handlers added later still go into it.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Register a handler.
    #[must_use]
    pub fn handler(self, task_type: impl Into<String>, handler: impl TaskHandler) -> Self {
        self.registry.register(task_type, handler);
        self
    }

    /// Register an async closure as a handler.
    #[must_use]
    pub fn handler_fn<F, Fut>(self, task_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Parameters, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_fn(task_type, f);
        self
    }

    /// Record lifecycle events into `sink`.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Emit lifecycle events as `tracing` records instead of keeping them.
    #[must_use]
    pub fn with_tracing_audit(self) -> Self {
        self.with_audit_sink(Box::new(TracingAuditSink))
    }

    /// Validate the configuration and start the workers.
    ///
    /// # Errors
    ///
    /// Invalid configuration or worker spawn failure.
    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        match self.audit {
            Some(audit) => Orchestrator::with_audit(self.config, self.registry, audit),
            None => Orchestrator::new(self.config, self.registry),
        }
    }
}
