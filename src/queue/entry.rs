//! Ready-queue entries and their ordering keys.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::{TaskHandle, TaskId};
use crate::timer::deadline_after;

/// Task priority. Higher values are dispatched first; any `i32` is valid.
pub type Priority = i32;

/// How an entry comes back after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Runs once and is gone.
    Once,
    /// Due again `period` after its previous due time.
    FixedRate(Duration),
    /// Due again `delay` after its previous run completed.
    FixedDelay(Duration),
}

impl Recurrence {
    pub fn is_recurring(self) -> bool {
        !matches!(self, Recurrence::Once)
    }

    /// Next due time for an entry that was due at `due` and finished running
    /// at `completed`. `None` for one-shot entries. Steps longer than
    /// [`MAX_DELAY`](crate::timer::MAX_DELAY) are clamped.
    pub fn next_due(self, due: Instant, completed: Instant) -> Option<Instant> {
        match self {
            Recurrence::Once => None,
            Recurrence::FixedRate(period) => Some(deadline_after(due, period)),
            Recurrence::FixedDelay(delay) => Some(deadline_after(completed, delay)),
        }
    }
}

/// A queued task together with its dispatch key.
///
/// Among entries that are due, entries order by `priority` (greater first)
/// and then by `sequence` (smaller first), which makes dispatch among equal
/// priorities FIFO.
#[derive(Debug, Clone)]
pub struct PriorityEntry {
    task: TaskHandle,
    priority: Priority,
    sequence: u64,
    due: Instant,
    recurrence: Recurrence,
}

impl PriorityEntry {
    pub(crate) fn new(
        task: TaskHandle,
        priority: Priority,
        sequence: u64,
        due: Instant,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            task,
            priority,
            sequence,
            due,
            recurrence,
        }
    }

    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Insertion sequence assigned by the queue.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Instant from which the entry may be extracted.
    pub fn due(&self) -> Instant {
        self.due
    }

    pub fn recurrence(&self) -> Recurrence {
        self.recurrence
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    pub(crate) fn into_task(self) -> TaskHandle {
        self.task
    }
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for PriorityEntry {}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then the older sequence
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An entry that is not due yet, ordered so the max-heap yields the earliest
/// due time first.
#[derive(Debug, Clone)]
pub(crate) struct Staged(pub PriorityEntry);

impl PartialEq for Staged {
    fn eq(&self, other: &Self) -> bool {
        self.0.due == other.0.due && self.0.sequence == other.0.sequence
    }
}

impl Eq for Staged {}

impl Ord for Staged {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .due
            .cmp(&self.0.due)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for Staged {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
