//! Tests for error types

use prometheus_orchestrator::core::{ErrorKind, HandlerError, OrchestratorError, TaskError};

#[test]
fn test_insufficient_resources_error() {
    let err = OrchestratorError::InsufficientResources {
        kind: "compute".into(),
        requested: 5,
        available: 4,
    };
    assert_eq!(
        format!("{err}"),
        "insufficient resources: compute requested 5, available 4"
    );
    assert_eq!(err.kind(), ErrorKind::InsufficientResources);
}

#[test]
fn test_cycle_error_lists_members() {
    let err = OrchestratorError::Cycle(vec!["a".into(), "b".into()]);
    assert_eq!(format!("{err}"), "dependency cycle among: a, b");
    assert_eq!(err.kind(), ErrorKind::Cycle);
}

#[test]
fn test_validation_error() {
    let err = OrchestratorError::Validation("no handler".into());
    assert_eq!(format!("{err}"), "validation error: no handler");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_task_error_display_uses_kind_names() {
    let err = TaskError::new(ErrorKind::Timeout, "deadline passed while running");
    assert_eq!(err.to_string(), "timeout_error: deadline passed while running");
    assert_eq!(ErrorKind::Handler.to_string(), "handler_error");
    assert_eq!(ErrorKind::Cancelled.to_string(), "cancellation_error");
}

#[test]
fn test_handler_error_retryability() {
    assert!(HandlerError::new("flaky upstream").retryable);
    assert!(!HandlerError::permanent("bad input").retryable);
}

#[test]
fn test_error_kind_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorKind::InsufficientResources).unwrap();
    assert_eq!(json, "\"insufficient_resources\"");
}
