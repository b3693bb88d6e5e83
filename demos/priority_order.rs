//! Walks through priority dispatch, reprioritization, failure isolation, and
//! a repeating heartbeat.
//!
//! ```text
//! RUST_LOG=bgsched=debug cargo run --example priority_order
//! ```

use std::sync::Arc;
use std::time::Duration;

use bgsched::{Scheduler, SchedulerConfig, TaskHandle};
use parking_lot::Mutex;
use tracing::info;

fn appender(output: &Arc<Mutex<String>>, text: &'static str) -> TaskHandle {
    let output = Arc::clone(output);
    TaskHandle::from_fn(move || {
        output.lock().push_str(text);
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig::from_json(r#"{ "workers": 3, "name": "demo" }"#)?;
    let scheduler = Scheduler::from_config(config)?;
    let output = Arc::new(Mutex::new(String::new()));

    // Same delay, different priorities.
    scheduler.schedule_once(&appender(&output, "Low "), Duration::from_secs(1), 1)?;
    scheduler.schedule_once(&appender(&output, "High "), Duration::from_secs(1), 2)?;

    // Promoted before it is due.
    let promoted = appender(&output, "Promoted ");
    scheduler.schedule_once(&promoted, Duration::from_secs(2), 1)?;
    scheduler.schedule_once(&appender(&output, "Regular "), Duration::from_secs(2), 2)?;
    scheduler.adjust_priority(&promoted, 3);

    // A failure is logged by the default sink and nothing else is affected.
    let failing = TaskHandle::from_fn(|| Err("simulated failure".into()));
    scheduler.schedule_once(&failing, Duration::from_secs(3), 1)?;

    let beats = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&beats);
    let heartbeat = TaskHandle::new(move || {
        let counter = Arc::clone(&counter);
        async move {
            *counter.lock() += 1;
            Ok(())
        }
    });
    scheduler.schedule_at_fixed_rate(&heartbeat, Duration::ZERO, Duration::from_millis(500), 0)?;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    scheduler.shutdown();

    info!(output = %output.lock(), heartbeats = *beats.lock(), "demo finished");
    info!(stats = %serde_json::to_string(&scheduler.stats())?, "final counters");
    Ok(())
}
