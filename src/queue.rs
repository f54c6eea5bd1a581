//! Priority queue of timed tasks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::clock::MonoTime;
use crate::schedule::Task;

/// A task reference paired with the deadline that orders it.
///
/// `due` means "earliest eligibility" while the task sits in the waiting
/// queue and "window deadline" once promoted to pending. Only the worker
/// reads or writes it.
pub(crate) struct TimedTask {
    pub due: MonoTime,
    pub task: Arc<Task>,
}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for TimedTask {}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap surfaces the earliest deadline first.
        other.due.cmp(&self.due)
    }
}

/// Min-heap of tasks keyed by ascending due time. No stability guarantee
/// among equal deadlines.
pub(crate) struct TaskQueue {
    heap: BinaryHeap<TimedTask>,
}

impl TaskQueue {
    pub fn with_capacity(reserve: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(reserve),
        }
    }

    pub fn push(&mut self, entry: TimedTask) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<TimedTask> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&TimedTask> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
