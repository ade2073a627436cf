//! Tests for utility functions

use prometheus_orchestrator::util::{remaining_until, requirements, PlanId, ResourceKind, TaskId};

#[test]
fn test_requirements_builder() {
    let req = requirements([("compute", 2), ("memory", 512)]);
    assert_eq!(req.len(), 2);
    assert_eq!(req[&ResourceKind::compute()], 2);
    assert_eq!(req[&ResourceKind::memory()], 512);
}

#[test]
fn test_resource_kind_names() {
    assert_eq!(ResourceKind::compute().as_str(), "compute");
    assert_eq!(ResourceKind::accelerator().to_string(), "accelerator");
    assert_eq!(ResourceKind::from("gpu_vram"), ResourceKind::new("gpu_vram"));
}

#[test]
fn test_task_ids_are_unique_and_serializable() {
    let a = TaskId::new();
    let b = TaskId::new();
    assert_ne!(a, b);

    let json = serde_json::to_string(&a).unwrap();
    let back: TaskId = serde_json::from_str(&json).unwrap();
    assert_eq!(a, back);
}

#[test]
fn test_plan_id_display() {
    let id = PlanId::from("research-7");
    assert_eq!(id.as_str(), "research-7");
    assert_eq!(id.to_string(), "research-7");
}

#[test]
fn test_remaining_until() {
    assert_eq!(remaining_until(1_500, 1_000).map(|d| d.as_millis()), Some(500));
    assert_eq!(remaining_until(1_000, 1_000), None);
    assert_eq!(remaining_until(900, 1_000), None);
}
