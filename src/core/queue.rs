//! Queue abstraction for admitted, dependency-free tasks.

use crate::core::task::SchedulingKey;
use crate::util::serde::TaskId;

/// A queued task reference and its ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Task identifier.
    pub task_id: TaskId,
    /// Ordering key captured at enqueue time.
    pub key: SchedulingKey,
}

/// Ordered holding area. Implementations must honor [`SchedulingKey`] order
/// so that every observer agrees on what runs next.
pub trait TaskQueue: Send {
    /// Insert an entry. Re-inserting a task replaces its previous entry.
    fn enqueue(&mut self, entry: QueueEntry);
    /// Remove and return the entry that runs next.
    fn pop_next(&mut self) -> Option<QueueEntry>;
    /// Look at the entry that runs next without removing it.
    fn peek_next(&self) -> Option<QueueEntry>;
    /// Remove a specific task; returns whether it was present.
    fn remove(&mut self, task_id: &TaskId) -> bool;
    /// Whether `task_id` is queued.
    fn contains(&self, task_id: &TaskId) -> bool;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
