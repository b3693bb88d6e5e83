//! Priority-ordered execution of delayed and repeating tasks.
//!
//! [`Scheduler`] ties the [`ReadyQueue`] to the [`TimerFacility`]. Every
//! submission inserts one entry into the queue and arms one timer. When any
//! timer fires, the scheduler extracts the best entry that is due *at that
//! moment* and runs it. Extraction is global: the entry that runs is not
//! necessarily the one whose timer fired, but the highest-priority entry
//! whose delay has elapsed (ties go to the earliest submission).
//!
//! Task bodies run in their own Tokio task, so an error or a panic is turned
//! into a [`TaskFailure`] for the configured [`ErrorSink`] and never reaches
//! the timer loop.
//!
//! Repeating submissions keep one logical entry alive: after each run the task
//! is resubmitted with the priority its entry carried, due again one period
//! later. A priority set through [`Scheduler::adjust_priority`] therefore
//! persists across periods.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use bgsched::scheduler::Scheduler;
//! use bgsched::task::TaskHandle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::new(3)?;
//!     let low = TaskHandle::from_fn(|| { println!("low"); Ok(()) });
//!     let high = TaskHandle::from_fn(|| { println!("high"); Ok(()) });
//!
//!     scheduler.schedule_once(&low, Duration::from_secs(1), 1)?;
//!     scheduler.schedule_once(&high, Duration::from_secs(1), 2)?;
//!
//!     tokio::time::sleep(Duration::from_millis(1500)).await;
//!     scheduler.shutdown();
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::queue::{Priority, PriorityEntry, ReadyQueue, Recurrence};
use crate::sink::{ErrorSink, TaskFailure, TaskFault, TracingSink};
use crate::task::{TaskHandle, TaskId};
use crate::timer::{self, Callback, TimerError, TimerFacility};

mod config;

pub use config::SchedulerConfig;

/// Errors produced by the scheduler.
///
/// Every rejection happens before anything is queued or armed.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is already queued")]
    AlreadyQueued(TaskId),

    #[error("scheduler is shut down")]
    Shutdown,

    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] TryCurrentError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<TimerError> for SchedulerError {
    fn from(err: TimerError) -> Self {
        match err {
            TimerError::Shutdown => SchedulerError::Shutdown,
            TimerError::ZeroPeriod => SchedulerError::InvalidArgument(err.to_string()),
        }
    }
}

/// Point-in-time counters, cheap to copy and serializable for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Entries currently queued, due or not.
    pub queued: usize,
    /// Timers armed so far.
    pub arms: u64,
    /// Timer firings so far, including idle ones.
    pub firings: u64,
    /// Firings that found no due entry.
    pub idle_firings: u64,
    /// Task bodies run to completion or failure.
    pub executed: u64,
    /// Task bodies that failed or panicked.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    firings: AtomicU64,
    idle_firings: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

// State reachable from timer callbacks.
struct Shared {
    name: String,
    queue: ReadyQueue,
    sink: Arc<dyn ErrorSink>,
    counters: Counters,
    closed: AtomicBool,
}

impl Shared {
    // One timer firing: run the best due entry, if any.
    async fn run_next(&self) {
        self.counters.firings.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.queue.extract_best() else {
            self.counters.idle_firings.fetch_add(1, Ordering::Relaxed);
            trace!(scheduler = %self.name, "timer fired with nothing due");
            return;
        };

        debug!(
            scheduler = %self.name,
            task = %entry.task_id(),
            priority = entry.priority(),
            sequence = entry.sequence(),
            "executing task"
        );

        let fault = match tokio::spawn(entry.task().invoke()).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(TaskFault::Failed(err)),
            Err(err) => Some(TaskFault::from(err)),
        };

        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = fault {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.sink.report(&TaskFailure::new(&entry, fault));
        }

        self.resubmit(entry);
    }

    // Puts a recurring entry back, due one period later.
    fn resubmit(&self, entry: PriorityEntry) {
        let recurrence = entry.recurrence();
        let Some(due) = recurrence.next_due(entry.due(), Instant::now()) else {
            return;
        };

        let (id, priority) = (entry.task_id(), entry.priority());
        if self.closed.load(Ordering::Acquire) {
            debug!(scheduler = %self.name, task = %id, "shut down; recurring task not resubmitted");
            return;
        }

        let task = entry.into_task();
        match self.queue.insert_if_absent(task.clone(), priority, due, recurrence) {
            // Shutdown may have swept recurring entries between the check above
            // and the insert.
            Some(_) if self.closed.load(Ordering::Acquire) => {
                self.queue.remove_by_task(&task);
                debug!(scheduler = %self.name, task = %id, "shut down; recurring task not resubmitted");
            }
            Some(next) => trace!(
                scheduler = %self.name,
                task = %id,
                priority,
                sequence = next.sequence(),
                "recurring task resubmitted"
            ),
            None => debug!(
                scheduler = %self.name,
                task = %id,
                "recurring task already queued; resubmission skipped"
            ),
        }
    }
}

/// Priority-aware background task scheduler.
///
/// Scheduling methods are synchronous: they validate, queue, arm, and return
/// without waiting for the task to run. They may be called from any thread;
/// timers run on the Tokio runtime the scheduler was built on.
///
/// Dropping the scheduler stops repeating timers. One-shot timers that are
/// already armed still fire.
pub struct Scheduler {
    shared: Arc<Shared>,
    timers: TimerFacility,
    // Serializes public reprioritization calls.
    adjust: Mutex<()>,
}

impl Scheduler {
    /// Creates a scheduler with `workers` concurrent workers on the current
    /// Tokio runtime, logging failures through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidArgument`] for zero workers, or
    /// [`SchedulerError::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        Self::builder().workers(workers).build()
    }

    /// Creates a scheduler from a [`SchedulerConfig`] on the current runtime.
    pub fn from_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::builder().config(config).build()
    }

    /// Returns a builder for the remaining knobs: error sink and runtime handle.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Runs `task` once, `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyQueued`] if the task already has a
    /// queued entry, or [`SchedulerError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn schedule_once(
        &self,
        task: &TaskHandle,
        delay: Duration,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        let due = timer::deadline_after(Instant::now(), delay);
        self.submit(task, priority, due, Recurrence::Once, |timers, cb| {
            timers.arm_once(delay, cb)
        })
    }

    /// Runs `task` after `initial_delay` and then every `period`, measured from
    /// each scheduled start.
    ///
    /// # Errors
    ///
    /// As [`schedule_once`](Self::schedule_once), plus
    /// [`SchedulerError::InvalidArgument`] for a zero `period`.
    pub fn schedule_at_fixed_rate(
        &self,
        task: &TaskHandle,
        initial_delay: Duration,
        period: Duration,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidArgument(
                "period must be greater than zero".to_owned(),
            ));
        }
        let due = timer::deadline_after(Instant::now(), initial_delay);
        self.submit(task, priority, due, Recurrence::FixedRate(period), |timers, cb| {
            timers.arm_fixed_rate(initial_delay, period, cb)
        })
    }

    /// Runs `task` after `initial_delay` and then `delay` after each run
    /// completes.
    ///
    /// # Errors
    ///
    /// As [`schedule_once`](Self::schedule_once), plus
    /// [`SchedulerError::InvalidArgument`] for a zero `delay`.
    pub fn schedule_with_fixed_delay(
        &self,
        task: &TaskHandle,
        initial_delay: Duration,
        delay: Duration,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        if delay.is_zero() {
            return Err(SchedulerError::InvalidArgument(
                "delay between runs must be greater than zero".to_owned(),
            ));
        }
        let due = timer::deadline_after(Instant::now(), initial_delay);
        self.submit(task, priority, due, Recurrence::FixedDelay(delay), |timers, cb| {
            timers.arm_fixed_delay(initial_delay, delay, cb)
        })
    }

    /// Moves the queued entry of `task` to `new_priority`, behind any entries
    /// that already hold that priority.
    ///
    /// Returns `false` without any effect if `task` is not queued, e.g. it
    /// already ran, is running right now, or was never submitted.
    pub fn adjust_priority(&self, task: &TaskHandle, new_priority: Priority) -> bool {
        let _guard = self.adjust.lock();
        match self.shared.queue.reprioritize(task, new_priority) {
            Some(entry) => {
                debug!(
                    scheduler = %self.shared.name,
                    task = %entry.task_id(),
                    priority = new_priority,
                    sequence = entry.sequence(),
                    "task reprioritized"
                );
                true
            }
            None => {
                trace!(scheduler = %self.shared.name, task = %task.id(), "task not queued; priority unchanged");
                false
            }
        }
    }

    /// Stops arming new timers. Idempotent.
    ///
    /// Repeating timers stop at their next tick and every recurring entry is
    /// dropped from the queue, so a repeating task never runs after this
    /// returns (a run already in progress finishes). One-shot timers armed
    /// earlier still fire and run the best due one-shot entry. Every later
    /// submission fails with [`SchedulerError::Shutdown`].
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timers.shutdown();
        let dropped = self.shared.queue.remove_recurring();
        info!(
            scheduler = %self.shared.name,
            queued = self.shared.queue.len(),
            dropped_recurring = dropped,
            "scheduler shut down"
        );
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn worker_count(&self) -> usize {
        self.timers.worker_count()
    }

    /// Number of queued entries, due or not.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Priority of the queued entry for `task`, if any.
    pub fn queued_priority(&self, task: &TaskHandle) -> Option<Priority> {
        self.shared.queue.priority_of(task)
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.shared.counters;
        SchedulerStats {
            queued: self.shared.queue.len(),
            arms: self.timers.arms(),
            firings: counters.firings.load(Ordering::Relaxed),
            idle_firings: counters.idle_firings.load(Ordering::Relaxed),
            executed: counters.executed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    fn submit(
        &self,
        task: &TaskHandle,
        priority: Priority,
        due: Instant,
        recurrence: Recurrence,
        arm: impl FnOnce(&TimerFacility, Callback) -> Result<(), TimerError>,
    ) -> Result<(), SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }

        let entry = self
            .shared
            .queue
            .insert_if_absent(task.clone(), priority, due, recurrence)
            .ok_or(SchedulerError::AlreadyQueued(task.id()))?;

        if let Err(err) = arm(&self.timers, self.firing()) {
            self.shared.queue.remove_by_task(task);
            return Err(err.into());
        }

        debug!(
            scheduler = %self.shared.name,
            task = %entry.task_id(),
            priority,
            sequence = entry.sequence(),
            recurrence = ?recurrence,
            "task scheduled"
        );
        Ok(())
    }

    fn firing(&self) -> Callback {
        let shared = Arc::clone(&self.shared);
        timer::callback(move || {
            let shared = Arc::clone(&shared);
            async move { shared.run_next().await }
        })
    }
}

/// Builder for a [`Scheduler`].
///
/// # Examples
///
/// ```rust,no_run
/// use bgsched::scheduler::Scheduler;
/// use bgsched::sink::sink_fn;
///
/// # fn main() -> Result<(), bgsched::scheduler::SchedulerError> {
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let scheduler = Scheduler::builder()
///     .workers(4)
///     .name("reports")
///     .sink(sink_fn(|failure| eprintln!("{}: {}", failure.task, failure.fault)))
///     .handle(runtime.handle().clone())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    sink: Arc<dyn ErrorSink>,
    handle: Option<Handle>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            sink: Arc::new(TracingSink),
            handle: None,
        }
    }
}

impl SchedulerBuilder {
    /// Replaces all configurable settings at once.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets where task failures are reported. Defaults to [`TracingSink`].
    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs timers on `handle` instead of the runtime current at
    /// [`build`](Self::build) time.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidArgument`] for an invalid config, or
    /// [`SchedulerError::NoRuntime`] if no handle was given and none is current.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current()?,
        };

        let SchedulerConfig { workers, name } = self.config;
        info!(scheduler = %name, workers, "scheduler started");

        Ok(Scheduler {
            shared: Arc::new(Shared {
                name,
                queue: ReadyQueue::new(),
                sink: self.sink,
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
            timers: TimerFacility::new(handle, workers),
            adjust: Mutex::new(()),
        })
    }
}
