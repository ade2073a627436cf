//! In-memory queue with priority and deadline awareness.

use std::collections::{BTreeMap, HashMap};

use crate::core::queue::{QueueEntry, TaskQueue};
use crate::core::task::SchedulingKey;
use crate::util::serde::TaskId;

/// In-memory queue ordered by [`SchedulingKey`].
///
/// A `BTreeMap` keyed by the scheduling key gives O(log n) enqueue, dequeue,
/// and removal by id (through the reverse index), which cancellation needs.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    ordered: BTreeMap<SchedulingKey, TaskId>,
    keys: HashMap<TaskId, SchedulingKey>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task ids in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ordered.values().copied()
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&mut self, entry: QueueEntry) {
        if let Some(previous) = self.keys.insert(entry.task_id, entry.key) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(entry.key, entry.task_id);
    }

    fn pop_next(&mut self) -> Option<QueueEntry> {
        let (key, task_id) = self.ordered.pop_first()?;
        self.keys.remove(&task_id);
        Some(QueueEntry { task_id, key })
    }

    fn peek_next(&self) -> Option<QueueEntry> {
        self.ordered
            .first_key_value()
            .map(|(key, task_id)| QueueEntry { task_id: *task_id, key: *key })
    }

    fn remove(&mut self, task_id: &TaskId) -> bool {
        match self.keys.remove(task_id) {
            Some(key) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    fn contains(&self, task_id: &TaskId) -> bool {
        self.keys.contains_key(task_id)
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}
