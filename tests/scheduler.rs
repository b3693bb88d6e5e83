//! End-to-end ordering, isolation, and shutdown behavior of the scheduler.

use std::sync::Arc;
use std::time::Duration;

use bgsched::sink::sink_fn;
use bgsched::{ErrorSink, Scheduler, SchedulerError, TaskFailure, TaskHandle, TaskId};
use parking_lot::Mutex;
use tokio::time::sleep;

type Output = Arc<Mutex<String>>;

fn appender(output: &Output, text: &'static str) -> TaskHandle {
    let output = Arc::clone(output);
    TaskHandle::from_fn(move || {
        output.lock().push_str(text);
        Ok(())
    })
}

fn failure_log() -> (Arc<dyn ErrorSink>, Arc<Mutex<Vec<TaskId>>>) {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&failures);
    let sink = sink_fn(move |failure: &TaskFailure| record.lock().push(failure.task));
    (sink, failures)
}

#[tokio::test(start_paused = true)]
async fn single_task_runs_after_delay() {
    let scheduler = Scheduler::new(3).unwrap();
    let output = Output::default();

    scheduler
        .schedule_once(&appender(&output, "Task executed!"), Duration::from_secs(1), 1)
        .unwrap();

    sleep(Duration::from_millis(500)).await;
    assert_eq!(output.lock().as_str(), "");
    sleep(Duration::from_secs(1)).await;
    assert_eq!(output.lock().as_str(), "Task executed!");
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn higher_priority_runs_first_when_due_together() {
    let scheduler = Scheduler::new(3).unwrap();
    let output = Output::default();

    scheduler
        .schedule_once(&appender(&output, "Low "), Duration::from_secs(1), 1)
        .unwrap();
    scheduler
        .schedule_once(&appender(&output, "High "), Duration::from_secs(1), 2)
        .unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(output.lock().as_str(), "High Low ");
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn equal_priorities_run_in_submission_order() {
    let scheduler = Scheduler::new(3).unwrap();
    let output = Output::default();

    for label in ["A ", "B ", "C "] {
        scheduler
            .schedule_once(&appender(&output, label), Duration::from_secs(1), 4)
            .unwrap();
    }

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(output.lock().as_str(), "A B C ");
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn reprioritized_task_overtakes() {
    let scheduler = Scheduler::new(3).unwrap();
    let output = Output::default();
    let low = appender(&output, "Low ");
    let high = appender(&output, "High ");

    scheduler.schedule_once(&low, Duration::from_secs(1), 1).unwrap();
    scheduler.schedule_once(&high, Duration::from_secs(1), 2).unwrap();
    assert!(scheduler.adjust_priority(&low, 3));
    assert_eq!(scheduler.queued_priority(&low), Some(3));

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(output.lock().as_str(), "Low High ");
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failing_task_does_not_block_others() {
    let (sink, failures) = failure_log();
    let scheduler = Scheduler::builder().workers(3).sink(sink).build().unwrap();
    let output = Output::default();

    let failing = TaskHandle::from_fn(|| Err("Simulated failure".into()));
    let success = appender(&output, "Success");
    scheduler.schedule_once(&failing, Duration::from_secs(1), 1).unwrap();
    scheduler.schedule_once(&success, Duration::from_secs(2), 2).unwrap();

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(output.lock().as_str(), "Success");
    assert_eq!(*failures.lock(), vec![failing.id()]);
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn adjusting_unknown_task_is_a_noop() {
    let scheduler = Scheduler::new(1).unwrap();
    let output = Output::default();
    let queued = appender(&output, "queued");
    let stranger = appender(&output, "stranger");

    scheduler.schedule_once(&queued, Duration::from_secs(1), 1).unwrap();
    let before = scheduler.stats();

    assert!(!scheduler.adjust_priority(&stranger, 99));
    assert!(!scheduler.adjust_priority(&stranger, 99));
    assert_eq!(scheduler.stats(), before);
    assert_eq!(scheduler.queued_priority(&queued), Some(1));
    assert_eq!(scheduler.queued_priority(&stranger), None);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(output.lock().as_str(), "queued");

    // Already executed: also a no-op.
    assert!(!scheduler.adjust_priority(&queued, 5));
}

#[tokio::test(start_paused = true)]
async fn submissions_after_shutdown_never_run() {
    let scheduler = Scheduler::new(2).unwrap();
    let output = Output::default();

    scheduler.shutdown();
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());

    let late = appender(&output, "late");
    assert!(matches!(
        scheduler.schedule_once(&late, Duration::ZERO, 1),
        Err(SchedulerError::Shutdown)
    ));
    assert!(matches!(
        scheduler.schedule_at_fixed_rate(&late, Duration::ZERO, Duration::from_secs(1), 1),
        Err(SchedulerError::Shutdown)
    ));
    assert!(matches!(
        scheduler.schedule_with_fixed_delay(&late, Duration::ZERO, Duration::from_secs(1), 1),
        Err(SchedulerError::Shutdown)
    ));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(output.lock().as_str(), "");
    assert_eq!(scheduler.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_shots_armed_before_shutdown_still_run() {
    let scheduler = Scheduler::new(2).unwrap();
    let output = Output::default();

    scheduler
        .schedule_once(&appender(&output, "armed"), Duration::from_secs(1), 1)
        .unwrap();
    scheduler.shutdown();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(output.lock().as_str(), "armed");
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_keeps_cadence() {
    let scheduler = Scheduler::new(1).unwrap();
    let output = Output::default();

    scheduler
        .schedule_at_fixed_rate(
            &appender(&output, "."),
            Duration::from_millis(100),
            Duration::from_millis(200),
            1,
        )
        .unwrap();

    // Runs at 100, 300, 500, 700ms.
    sleep(Duration::from_millis(750)).await;
    assert_eq!(output.lock().as_str(), "....");
    scheduler.shutdown();
}
