//! The ready queue: a thread-safe, priority-ordered pool of pending tasks.
//!
//! [`ReadyQueue`] couples time-based readiness with priority selection. Each
//! entry carries a due instant; extraction first promotes every entry whose
//! due time has passed from a staging heap (ordered by due time) into the
//! ready heap (ordered by priority), then pops the best ready entry. An entry
//! therefore never runs before its delay has elapsed, and among due entries
//! the highest priority always wins.
//!
//! Insert and extract are `O(log n)`. Removing a task by identity is a linear
//! scan under the lock; the scheduler only does it to reprioritize or to
//! roll back a failed submission.
//!
//! The queue assigns every entry a sequence number at insertion, so equal
//! priorities dispatch in submission order.
//!
//! # Examples
//!
//! ```
//! use bgsched::queue::ReadyQueue;
//! use bgsched::task::TaskHandle;
//!
//! let queue = ReadyQueue::new();
//! let low = TaskHandle::from_fn(|| Ok(()));
//! let high = TaskHandle::from_fn(|| Ok(()));
//!
//! queue.insert(low.clone(), 1);
//! queue.insert(high.clone(), 2);
//!
//! assert_eq!(queue.extract_best().unwrap().task(), &high);
//! assert_eq!(queue.extract_best().unwrap().task(), &low);
//! assert!(queue.extract_best().is_none());
//! ```

use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::task::TaskHandle;

pub mod entry;

use entry::Staged;
pub use entry::{Priority, PriorityEntry, Recurrence};

#[derive(Debug, Default)]
struct Inner {
    ready: BinaryHeap<PriorityEntry>,
    staged: BinaryHeap<Staged>,
    next_sequence: u64,
}

impl Inner {
    fn push(
        &mut self,
        task: TaskHandle,
        priority: Priority,
        due: Instant,
        recurrence: Recurrence,
    ) -> PriorityEntry {
        let entry = PriorityEntry::new(task, priority, self.next_sequence, due, recurrence);
        self.next_sequence += 1;
        self.staged.push(Staged(entry.clone()));
        entry
    }

    // Moves every entry due at `now` into the ready heap.
    fn promote(&mut self, now: Instant) {
        while self.staged.peek().is_some_and(|s| s.0.due() <= now) {
            if let Some(Staged(entry)) = self.staged.pop() {
                self.ready.push(entry);
            }
        }
    }

    fn entries(&self) -> impl Iterator<Item = &PriorityEntry> {
        self.ready.iter().chain(self.staged.iter().map(|s| &s.0))
    }

    fn contains(&self, task: &TaskHandle) -> bool {
        self.entries().any(|e| e.task() == task)
    }

    fn remove(&mut self, task: &TaskHandle) -> Option<PriorityEntry> {
        if self.ready.iter().any(|e| e.task() == task) {
            let mut entries = std::mem::take(&mut self.ready).into_vec();
            let removed = take_matching(&mut entries, |e| e.task() == task);
            self.ready = BinaryHeap::from(entries);
            return removed;
        }

        if self.staged.iter().any(|s| s.0.task() == task) {
            let mut entries = std::mem::take(&mut self.staged).into_vec();
            let removed = take_matching(&mut entries, |s| s.0.task() == task);
            self.staged = BinaryHeap::from(entries);
            return removed.map(|Staged(entry)| entry);
        }

        None
    }

    // Drops every entry matching `pred`, returning how many went.
    fn remove_where(&mut self, pred: impl Fn(&PriorityEntry) -> bool) -> usize {
        let before = self.len();
        self.ready.retain(|e| !pred(e));
        self.staged.retain(|s| !pred(&s.0));
        before - self.len()
    }

    fn len(&self) -> usize {
        self.ready.len() + self.staged.len()
    }
}

fn take_matching<T>(entries: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    entries
        .iter()
        .position(pred)
        .map(|idx| entries.swap_remove(idx))
}

/// Thread-safe priority queue of pending tasks.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    inner: Mutex<Inner>,
}

impl ReadyQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a one-shot entry for `task` that is due immediately.
    pub fn insert(&self, task: TaskHandle, priority: Priority) -> PriorityEntry {
        self.insert_at(task, priority, Instant::now(), Recurrence::Once)
    }

    /// Inserts an entry for `task` that becomes extractable at `due`.
    ///
    /// Does not check for an existing entry of the same task; use
    /// [`insert_if_absent`](Self::insert_if_absent) where that matters.
    pub fn insert_at(
        &self,
        task: TaskHandle,
        priority: Priority,
        due: Instant,
        recurrence: Recurrence,
    ) -> PriorityEntry {
        self.inner.lock().push(task, priority, due, recurrence)
    }

    /// Like [`insert_at`](Self::insert_at), but only if `task` has no queued
    /// entry. The check and the insert happen under one lock acquisition.
    ///
    /// Returns `None` when the task was already queued.
    pub fn insert_if_absent(
        &self,
        task: TaskHandle,
        priority: Priority,
        due: Instant,
        recurrence: Recurrence,
    ) -> Option<PriorityEntry> {
        let mut inner = self.inner.lock();
        if inner.contains(&task) {
            return None;
        }
        Some(inner.push(task, priority, due, recurrence))
    }

    /// Removes and returns the best entry that is due now.
    pub fn extract_best(&self) -> Option<PriorityEntry> {
        self.extract_due(Instant::now())
    }

    /// Removes and returns the entry with the greatest priority among those
    /// due at `now`, ties going to the earliest insertion. Returns `None` if no
    /// entry is due.
    pub fn extract_due(&self, now: Instant) -> Option<PriorityEntry> {
        let mut inner = self.inner.lock();
        inner.promote(now);
        inner.ready.pop()
    }

    /// Removes the entry for `task`, matched by identity.
    pub fn remove_by_task(&self, task: &TaskHandle) -> Option<PriorityEntry> {
        self.inner.lock().remove(task)
    }

    /// Removes every recurring entry, due or not, and returns how many were
    /// removed. One-shot entries stay.
    pub fn remove_recurring(&self) -> usize {
        self.inner.lock().remove_where(PriorityEntry::is_recurring)
    }

    /// Replaces the entry for `task` with one carrying `priority` and a fresh
    /// sequence number, so it queues behind existing entries of equal priority.
    /// The due time and recurrence are kept.
    ///
    /// Removal and reinsertion share one critical section. Returns the new
    /// entry, or `None` (and changes nothing) if `task` was not queued.
    pub fn reprioritize(&self, task: &TaskHandle, priority: Priority) -> Option<PriorityEntry> {
        let mut inner = self.inner.lock();
        let old = inner.remove(task)?;
        let (due, recurrence) = (old.due(), old.recurrence());
        Some(inner.push(old.into_task(), priority, due, recurrence))
    }

    /// Returns `true` if `task` currently has a queued entry, due or not.
    pub fn contains(&self, task: &TaskHandle) -> bool {
        self.inner.lock().contains(task)
    }

    /// Returns the queued priority of `task`, if it is queued.
    pub fn priority_of(&self, task: &TaskHandle) -> Option<Priority> {
        self.inner
            .lock()
            .entries()
            .find(|e| e.task() == task)
            .map(PriorityEntry::priority)
    }

    /// Returns the number of queued entries, due or not.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
