//! Tests for the API request/response models

use std::time::Duration;

use prometheus_orchestrator::builders::OrchestratorBuilder;
use prometheus_orchestrator::config::OrchestratorConfig;
use prometheus_orchestrator::core::{ErrorKind, HandlerError, PlanStatus, TaskSpec, TaskStatus};
use prometheus_orchestrator::runtime::{self, SubmitPlanRequest, SubmitTaskRequest};
use prometheus_orchestrator::util::{PlanId, ResourceKind, TaskId};

#[test]
fn test_submit_task_request_parses_wire_shape() {
    let req: SubmitTaskRequest = serde_json::from_str(
        r#"{ "type": "embed", "parameters": { "text": "hi" }, "priority": 3,
             "requirements": { "compute": 1, "memory": 64 } }"#,
    )
    .unwrap();
    let spec: TaskSpec = req.into();
    assert_eq!(spec.task_type, "embed");
    assert_eq!(spec.priority, 3);
    assert_eq!(spec.requirements[&ResourceKind::memory()], 64);
    assert!(spec.depends_on.is_empty());
}

#[test]
fn test_api_round_trip_through_orchestrator() {
    let orchestrator = OrchestratorBuilder::new(
        OrchestratorConfig::new()
            .with_resources([("compute", 2)])
            .with_worker_count(2),
    )
    .handler_fn("upper", |params, _| async move {
        let text = params.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(serde_json::json!(text.to_uppercase()))
    })
    .build()
    .unwrap();

    let plan: SubmitPlanRequest = serde_json::from_value(serde_json::json!({
        "plan_id": "p1",
        "tasks": [
            { "key": "a", "type": "upper", "parameters": { "text": "x" }, "requirements": { "compute": 1 } },
            { "key": "b", "type": "upper", "parameters": { "text": "y" }, "requirements": { "compute": 1 } }
        ],
        "edges": [ { "from": "a", "to": "b" } ]
    }))
    .unwrap();
    let receipt = runtime::submit_plan(&orchestrator, plan).unwrap();
    let plan_id = PlanId::from("p1");
    orchestrator
        .wait_for_plan(&plan_id, Duration::from_secs(5))
        .unwrap()
        .unwrap();

    let status = runtime::plan_status(&orchestrator, &plan_id).unwrap();
    assert_eq!(status.status, PlanStatus::Completed);
    assert_eq!(status.members.len(), 2);
    let result = status.result.unwrap();
    let b = receipt.task_id("b").unwrap();
    assert_eq!(result.results[&b], serde_json::json!("Y"));

    let task = runtime::task_status(&orchestrator, b).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.plan_key.as_deref(), Some("b"));

    let health = runtime::health(&orchestrator);
    assert!(health.ok);
    assert_eq!(health.workers, 2);
    assert_eq!(health.completed, 2);
    assert_eq!(health.running, 0);
    let compute = health.resources[&ResourceKind::compute()];
    assert_eq!(compute.capacity, 2);
    assert_eq!(compute.allocated, 0);
    assert!(compute.utilization.abs() < f64::EPSILON);
    orchestrator.shutdown();
}

#[test]
fn test_cancel_plan_reports_members_and_utilization() {
    let orchestrator = OrchestratorBuilder::new(
        OrchestratorConfig::new()
            .with_resources([("compute", 2)])
            .with_worker_count(1)
            .with_cancel_grace_ms(50),
    )
    .handler_fn("hold", |_, ctx| async move {
        ctx.cancelled().await;
        Err(HandlerError::permanent("released"))
    })
    .build()
    .unwrap();

    let plan: SubmitPlanRequest = serde_json::from_value(serde_json::json!({
        "plan_id": "held",
        "tasks": [
            { "key": "a", "type": "hold", "requirements": { "compute": 2 } },
            { "key": "b", "type": "hold", "requirements": { "compute": 1 } }
        ],
        "edges": [ { "from": "a", "to": "b" } ]
    }))
    .unwrap();
    let receipt = runtime::submit_plan(&orchestrator, plan).unwrap();
    let a = receipt.task_id("a").unwrap();
    for _ in 0..500 {
        if orchestrator.task_status(a).unwrap().status == TaskStatus::Running {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let health = runtime::health(&orchestrator);
    assert_eq!(health.running, 1);
    assert_eq!(health.waiting, 1);
    assert!((health.resources[&ResourceKind::compute()].utilization - 1.0).abs() < f64::EPSILON);

    let plan_id = PlanId::from("held");
    runtime::cancel_plan(&orchestrator, &plan_id).unwrap();
    orchestrator
        .wait_for_plan(&plan_id, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    let status = runtime::plan_status(&orchestrator, &plan_id).unwrap();
    assert_eq!(status.status, PlanStatus::Failed);
    assert!(status.members.iter().all(|m| m.status == TaskStatus::Cancelled));

    let health = runtime::health(&orchestrator);
    assert_eq!(health.cancelled, 2);
    assert_eq!(health.resources[&ResourceKind::compute()].allocated, 0);

    let missing = runtime::cancel_plan(&orchestrator, &PlanId::from("nope")).unwrap_err();
    assert!(missing.not_found);
    orchestrator.shutdown();
}

#[test]
fn test_error_response_mapping() {
    let orchestrator = OrchestratorBuilder::new(
        OrchestratorConfig::new()
            .with_resources([("compute", 1)])
            .with_worker_count(1),
    )
    .build()
    .unwrap();

    let missing = runtime::task_status(&orchestrator, TaskId::new()).unwrap_err();
    assert!(missing.not_found);

    let req: SubmitTaskRequest = serde_json::from_str(
        r#"{ "type": "unregistered", "requirements": { "compute": 1 } }"#,
    )
    .unwrap();
    let rejected = runtime::submit_task(&orchestrator, req).unwrap_err();
    assert_eq!(rejected.kind, ErrorKind::Validation);
    assert!(!rejected.not_found);
    orchestrator.shutdown();
}
