//! Error sinks, where task failures are reported.
//!
//! The scheduler never lets a task fault escape into the timer loop. Instead
//! every fault is packaged as a [`TaskFailure`] and handed to an
//! [`ErrorSink`]. The default sink, [`TracingSink`], emits one
//! `tracing::error!` record per failure; [`sink_fn`] wraps a closure for
//! telemetry or tests.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::queue::{Priority, PriorityEntry};
use crate::task::{BoxError, TaskId};

/// Why a task body did not complete successfully.
#[derive(Debug, Error)]
pub enum TaskFault {
    #[error("task returned an error: {0}")]
    Failed(#[source] BoxError),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled before completing")]
    Cancelled,
}

impl From<JoinError> for TaskFault {
    fn from(err: JoinError) -> Self {
        if err.is_cancelled() {
            return TaskFault::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        TaskFault::Panicked(message)
    }
}

/// A single reported task failure.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: TaskId,
    pub priority: Priority,
    pub sequence: u64,
    pub fault: TaskFault,
}

impl TaskFailure {
    pub(crate) fn new(entry: &PriorityEntry, fault: TaskFault) -> Self {
        Self {
            task: entry.task_id(),
            priority: entry.priority(),
            sequence: entry.sequence(),
            fault,
        }
    }
}

/// Receiver of task failure events.
///
/// Implementations are shared across all worker tasks, so they must be
/// `Send + Sync` and should return quickly.
pub trait ErrorSink: Send + Sync {
    /// Record one failure.
    fn report(&self, failure: &TaskFailure);
}

/// Default sink: logs each failure through `tracing` at `ERROR` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, failure: &TaskFailure) {
        error!(
            task = %failure.task,
            priority = failure.priority,
            sequence = failure.sequence,
            error = %failure.fault,
            "task execution failed"
        );
    }
}

struct FnSink<F>(F);

impl<F> ErrorSink for FnSink<F>
where
    F: Fn(&TaskFailure) + Send + Sync,
{
    fn report(&self, failure: &TaskFailure) {
        (self.0)(failure)
    }
}

/// Wraps a closure as a shared [`ErrorSink`].
///
/// # Examples
///
/// ```
/// use bgsched::sink::sink_fn;
///
/// let sink = sink_fn(|failure| eprintln!("{} failed: {}", failure.task, failure.fault));
/// ```
pub fn sink_fn<F>(f: F) -> Arc<dyn ErrorSink>
where
    F: Fn(&TaskFailure) + Send + Sync + 'static,
{
    Arc::new(FnSink(f))
}
