//! Tests for audit sink

use prometheus_orchestrator::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};
use prometheus_orchestrator::util::{PlanId, TaskId};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let task_id = TaskId::new();

    sink.record(build_audit_event(
        Some(task_id),
        Some(PlanId::from("plan1")),
        AuditAction::Admit,
        Some("detail".to_string()),
    ));
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, Some(task_id));
    assert_eq!(events[0].plan_id, Some(PlanId::from("plan1")));
    assert_eq!(events[0].action, AuditAction::Admit);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(None, None, AuditAction::Admit, Some("1".into())));
    sink.record(build_audit_event(None, None, AuditAction::Start, Some("2".into())));
    sink.record(build_audit_event(None, None, AuditAction::Complete, Some("3".into())));

    let events = sink.snapshot();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].detail.as_deref(), Some("2")); // oldest dropped
    assert_eq!(events[1].action, AuditAction::Complete);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(None, None, AuditAction::Reject, Some("cycle".to_string()));
    assert_eq!(event.task_id, None);
    assert_eq!(event.action.to_string(), "reject");
    assert_eq!(event.detail, Some("cycle".to_string()));
    assert!(event.created_at_ms > 0);
}
