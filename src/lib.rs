//! # bgsched
//!
//! A priority-aware background task scheduler built on Tokio.
//!
//! Tasks are submitted with an integer priority and a timing policy: run once
//! after a delay, repeat at a fixed rate, or repeat with a fixed delay between
//! runs. Whenever a timer fires, the highest-priority task whose delay has
//! elapsed runs next, on a bounded pool of workers. Tasks still waiting in the
//! queue can be re-prioritized.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use bgsched::{Scheduler, TaskHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::new(3)?;
//!
//!     let cleanup = TaskHandle::from_fn(|| {
//!         println!("cleaning up");
//!         Ok(())
//!     });
//!     scheduler.schedule_at_fixed_rate(&cleanup, Duration::ZERO, Duration::from_secs(60), 1)?;
//!
//!     let report = TaskHandle::new(|| async {
//!         println!("sending report");
//!         Ok(())
//!     });
//!     scheduler.schedule_once(&report, Duration::from_secs(5), 1)?;
//!     scheduler.adjust_priority(&report, 10);
//!
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     scheduler.shutdown();
//!     Ok(())
//! }
//! ```

pub mod queue;
pub mod scheduler;
pub mod sink;
pub mod task;
pub mod timer;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use queue::{Priority, PriorityEntry, ReadyQueue, Recurrence};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerError, SchedulerStats};
pub use sink::{ErrorSink, TaskFailure, TaskFault, TracingSink};
pub use task::{BoxError, TaskHandle, TaskId, TaskResult};
