//! Tests for the ready queue ordering rule

use prometheus_orchestrator::core::{QueueEntry, SchedulingKey, TaskQueue};
use prometheus_orchestrator::infra::InMemoryQueue;
use prometheus_orchestrator::util::TaskId;

fn entry(priority: i32, deadline_ms: Option<u128>, hint: u16, seq: u64) -> QueueEntry {
    QueueEntry {
        task_id: TaskId::new(),
        key: SchedulingKey {
            priority,
            deadline_ms,
            hint,
            seq,
        },
    }
}

#[test]
fn test_full_ordering_rule() {
    let mut queue = InMemoryQueue::new();
    let low = entry(1, None, 0, 0);
    let no_deadline = entry(5, None, 9, 1);
    let late = entry(5, Some(2_000), 0, 2);
    let early = entry(5, Some(1_000), 0, 3);
    let hinted = entry(5, Some(1_000), 3, 4);
    let tie_second = entry(5, Some(1_000), 3, 6);

    for e in [low, no_deadline, late, early, tie_second, hinted] {
        queue.enqueue(e);
    }

    let order: Vec<TaskId> = std::iter::from_fn(|| queue.pop_next().map(|e| e.task_id)).collect();
    assert_eq!(
        order,
        vec![
            hinted.task_id,
            tie_second.task_id,
            early.task_id,
            late.task_id,
            no_deadline.task_id,
            low.task_id,
        ]
    );
}

#[test]
fn test_remove_and_contains() {
    let mut queue = InMemoryQueue::new();
    let a = entry(1, None, 0, 0);
    queue.enqueue(a);
    assert!(queue.contains(&a.task_id));
    assert!(queue.remove(&a.task_id));
    assert!(!queue.remove(&a.task_id));
    assert!(queue.is_empty());
}
