//! Timer facility for delayed and periodic callbacks on a bounded worker pool.
//!
//! [`TimerFacility`] adapts `tokio::time` into the three arming modes the
//! scheduler needs:
//!
//! | Method                                       | Next firing measured from          |
//! |----------------------------------------------|------------------------------------|
//! | [`arm_once`](TimerFacility::arm_once)        | *(fires once)*                     |
//! | [`arm_fixed_rate`](TimerFacility::arm_fixed_rate)   | the previous firing's scheduled start |
//! | [`arm_fixed_delay`](TimerFacility::arm_fixed_delay) | the previous firing's completion   |
//!
//! Deadlines are fixed at arm time. Delays and periods longer than
//! [`MAX_DELAY`] are clamped to it.
//!
//! Every firing first acquires a permit from a semaphore sized to the worker
//! count, so at most `workers` callbacks run at once. A firing that finds no
//! free worker waits for one.
//!
//! [`shutdown`](TimerFacility::shutdown) refuses new arms and stops repeating
//! timers at their next tick. One-shot timers armed earlier still fire, and
//! callbacks already running are never interrupted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Longest delay or period a timer honours, roughly 30 years. Longer values
/// are clamped, so deadline arithmetic never overflows.
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `delay` after `start`, with `delay` clamped to [`MAX_DELAY`].
pub fn deadline_after(start: Instant, delay: Duration) -> Instant {
    start + delay.min(MAX_DELAY)
}

/// Type-erased, reference-counted zero-argument async callback.
///
/// The facility clones the [`Arc`] into each spawned timer task and calls it
/// once per firing.
pub type Callback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static>;

/// Wraps an async closure as a [`Callback`].
///
/// # Examples
///
/// ```
/// use bgsched::timer::callback;
///
/// let tick = callback(|| async { tracing::trace!("tick") });
/// ```
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(f()) })
}

/// Errors produced when arming a timer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer facility is shut down")]
    Shutdown,

    #[error("repeating timers need a non-zero period")]
    ZeroPeriod,
}

/// Delayed/periodic callback executor backed by a Tokio runtime.
pub struct TimerFacility {
    handle: Handle,
    workers: Arc<Semaphore>,
    worker_count: usize,
    shutdown: watch::Sender<bool>,
    arms: AtomicU64,
}

impl TimerFacility {
    /// Creates a facility that spawns its timers on `handle` and runs at most
    /// `workers` callbacks concurrently.
    pub fn new(handle: Handle, workers: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handle,
            workers: Arc::new(Semaphore::new(workers)),
            worker_count: workers,
            shutdown,
            arms: AtomicU64::new(0),
        }
    }

    /// Returns the size of the worker pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the number of timers armed so far.
    pub fn arms(&self) -> u64 {
        self.arms.load(Ordering::Relaxed)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops accepting new arms and signals repeating timers to stop.
    ///
    /// Returns `true` on the call that performed the shutdown, `false` on every
    /// later call.
    pub fn shutdown(&self) -> bool {
        !self.shutdown.send_replace(true)
    }

    /// Fires `callback` once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn arm_once(&self, delay: Duration, callback: Callback) -> Result<(), TimerError> {
        self.check_open()?;
        let workers = Arc::clone(&self.workers);
        let deadline = deadline_after(Instant::now(), delay);

        self.handle.spawn(async move {
            time::sleep_until(deadline).await;
            fire(&workers, &callback).await;
        });

        debug!(delay = ?delay, "armed one-shot timer");
        Ok(())
    }

    /// Fires `callback` after `initial_delay` and then every `period`, measured
    /// from each firing's scheduled start. Firings of one timer never overlap;
    /// ticks missed while a slow callback runs are caught up back to back.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ZeroPeriod`] for a zero `period`, or
    /// [`TimerError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn arm_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        callback: Callback,
    ) -> Result<(), TimerError> {
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        self.check_open()?;
        let workers = Arc::clone(&self.workers);
        let mut stop = self.shutdown.subscribe();
        let start = deadline_after(Instant::now(), initial_delay);
        let period = period.min(MAX_DELAY);

        self.handle.spawn(async move {
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => break,
                    _ = interval.tick() => {}
                }
                if !fire(&workers, &callback).await {
                    break;
                }
            }
            trace!("fixed-rate timer stopped");
        });

        debug!(initial_delay = ?initial_delay, period = ?period, "armed fixed-rate timer");
        Ok(())
    }

    /// Fires `callback` after `initial_delay` and then `delay` after each
    /// firing completes.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ZeroPeriod`] for a zero `delay`, or
    /// [`TimerError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn arm_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        callback: Callback,
    ) -> Result<(), TimerError> {
        if delay.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        self.check_open()?;
        let workers = Arc::clone(&self.workers);
        let mut stop = self.shutdown.subscribe();
        let mut next = deadline_after(Instant::now(), initial_delay);

        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => break,
                    _ = time::sleep_until(next) => {}
                }
                if !fire(&workers, &callback).await {
                    break;
                }
                next = deadline_after(Instant::now(), delay);
            }
            trace!("fixed-delay timer stopped");
        });

        debug!(initial_delay = ?initial_delay, delay = ?delay, "armed fixed-delay timer");
        Ok(())
    }

    // Refuses the arm after shutdown, otherwise counts it.
    fn check_open(&self) -> Result<(), TimerError> {
        if self.is_shutdown() {
            return Err(TimerError::Shutdown);
        }
        self.arms.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// Resolves once shutdown is signalled or the facility is dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

// Runs one firing on a worker permit. Returns `false` if the pool is closed.
async fn fire(workers: &Semaphore, callback: &Callback) -> bool {
    let Ok(_permit) = workers.acquire().await else {
        return false;
    };
    callback().await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(hits: &Arc<AtomicUsize>, work: Duration) -> Callback {
        let hits = Arc::clone(hits);
        callback(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                if !work.is_zero() {
                    time::sleep(work).await;
                }
            }
        })
    }

    fn facility(workers: usize) -> TimerFacility {
        TimerFacility::new(Handle::current(), workers)
    }

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        timers
            .arm_once(Duration::from_secs(1), counting_callback(&hits, Duration::ZERO))
            .unwrap();

        time::sleep(Duration::from_millis(900)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timers.arms(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_rate_measures_from_start() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        // Firings at 0, 200, 400, 600ms; each takes 100ms.
        timers
            .arm_fixed_rate(
                Duration::ZERO,
                Duration::from_millis(200),
                counting_callback(&hits, Duration::from_millis(100)),
            )
            .unwrap();

        time::sleep(Duration::from_millis(650)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_measures_from_completion() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        // Firings at 0, 300, 600ms: 100ms of work plus a 200ms gap.
        timers
            .arm_fixed_delay(
                Duration::ZERO,
                Duration::from_millis(200),
                counting_callback(&hits, Duration::from_millis(100)),
            )
            .unwrap();

        time::sleep(Duration::from_millis(650)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let timers = facility(2);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            timers
                .arm_once(Duration::ZERO, counting_callback(&hits, Duration::from_millis(100)))
                .unwrap();
        }

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(&hits, Duration::ZERO);
        assert_eq!(
            timers.arm_fixed_rate(Duration::ZERO, Duration::ZERO, Arc::clone(&callback)),
            Err(TimerError::ZeroPeriod)
        );
        assert_eq!(
            timers.arm_fixed_delay(Duration::ZERO, Duration::ZERO, callback),
            Err(TimerError::ZeroPeriod)
        );
        assert_eq!(timers.arms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_delays_are_clamped() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        timers
            .arm_once(Duration::MAX, counting_callback(&hits, Duration::ZERO))
            .unwrap();
        timers
            .arm_fixed_rate(Duration::MAX, Duration::MAX, counting_callback(&hits, Duration::ZERO))
            .unwrap();
        timers
            .arm_fixed_delay(Duration::ZERO, Duration::MAX, counting_callback(&hits, Duration::ZERO))
            .unwrap();

        time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timers.arms(), 3);
    }

    #[test]
    fn deadline_after_saturates_at_max_delay() {
        let start = Instant::now();
        assert_eq!(deadline_after(start, Duration::MAX), start + MAX_DELAY);
        assert_eq!(
            deadline_after(start, Duration::from_secs(5)),
            start + Duration::from_secs(5)
        );
    }

    // ── shutdown ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_new_arms_and_is_idempotent() {
        let timers = facility(1);
        assert!(timers.shutdown());
        assert!(!timers.shutdown());
        assert!(timers.is_shutdown());

        let hits = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            timers.arm_once(Duration::ZERO, counting_callback(&hits, Duration::ZERO)),
            Err(TimerError::Shutdown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_armed_one_shots_fire() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        timers
            .arm_once(Duration::from_secs(1), counting_callback(&hits, Duration::ZERO))
            .unwrap();
        timers.shutdown();

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_repeating_timers() {
        let timers = facility(1);
        let hits = Arc::new(AtomicUsize::new(0));
        timers
            .arm_fixed_rate(
                Duration::ZERO,
                Duration::from_millis(100),
                counting_callback(&hits, Duration::ZERO),
            )
            .unwrap();

        time::sleep(Duration::from_millis(250)).await;
        timers.shutdown();
        let seen = hits.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }
}
