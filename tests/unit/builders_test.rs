//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_orchestrator::builders::{build_orchestrator, OrchestratorBuilder};
use prometheus_orchestrator::config::OrchestratorConfig;
use prometheus_orchestrator::core::{HandlerRegistry, OrchestratorError, TaskSpec, TaskStatus};
use prometheus_orchestrator::util::requirements;

fn config() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_resources([("compute", 2)])
        .with_worker_count(1)
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = OrchestratorBuilder::new(config().with_worker_count(0))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn test_builder_registers_handlers() {
    let orchestrator = OrchestratorBuilder::new(config())
        .handler_fn("noop", |_, _| async { Ok(serde_json::Value::Null) })
        .with_tracing_audit()
        .build()
        .unwrap();

    assert_eq!(orchestrator.registry().task_types(), vec!["noop".to_string()]);
    assert_eq!(orchestrator.stats().worker_count, 1);
    // Tracing sink keeps nothing.
    assert!(orchestrator.audit_events().is_empty());
    orchestrator.shutdown();
}

#[test]
fn test_build_orchestrator_shares_registry() {
    let registry = Arc::new(HandlerRegistry::new());
    let orchestrator = build_orchestrator(config(), Arc::clone(&registry)).unwrap();

    registry.register_fn("late", |_, _| async { Ok(serde_json::json!("ok")) });
    let receipt = orchestrator
        .submit_task(TaskSpec::new("late", requirements([("compute", 1)])))
        .unwrap();
    let record = orchestrator
        .wait_for_task(receipt.task_id, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    orchestrator.shutdown();
}
