//! Cancellable recurring and delayed tasks.
//!
//! [`PeriodicTask`] drives the watchdog and heartbeat; [`DelayedTask`]
//! drives the reconnect backoff. Both run as independent tokio tasks and
//! own their cancellation state.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A recurring job run on its own task.
///
/// The first run happens one `interval` after [`start`](Self::start). Runs
/// are scheduled against the monotonic clock; a run that overruns its slot
/// pushes the following run to one full `interval` after the late tick, so
/// runs never burst to catch up. The observed period is therefore
/// `max(interval, run time)` plus scheduler latency and drifts under load.
///
/// [`stop`](Self::stop) cancels the task and waits for an in-flight run to
/// finish; no run starts after it returns.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    generation: Arc<AtomicU64>,
    cancel_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<u64>>,
}

impl PeriodicTask {
    /// Create a stopped task.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            generation: Arc::new(AtomicU64::new(0)),
            cancel_tx: None,
            handle: None,
        }
    }

    /// Task name for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the task has been started and has not finished.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start running `job` every interval. The job returns
    /// `ControlFlow::Break` to end the task on its own.
    pub fn start<F, Fut>(&mut self, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if self.is_running() {
            warn!(task = %self.name, "Periodic task already running");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let name = self.name.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_rx.changed() => break,

                    _ = ticker.tick() => {
                        if *cancel_rx.borrow() || current.load(Ordering::SeqCst) != generation {
                            break;
                        }
                        runs += 1;
                        if job().await.is_break() {
                            debug!(task = %name, runs, "Periodic task finished on its own");
                            break;
                        }
                    }
                }
            }

            runs
        });

        info!(
            task = %self.name,
            interval_secs = self.interval.as_secs_f64(),
            generation,
            "Started periodic task"
        );

        self.cancel_tx = Some(cancel_tx);
        self.handle = Some(handle);
    }

    /// Cancel the task and wait for any in-flight run to complete.
    pub async fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(runs) => info!(task = %self.name, runs, "Stopped periodic task"),
                Err(e) => warn!(task = %self.name, error = %e, "Periodic task ended abnormally"),
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// A job that runs once after a delay unless cancelled first.
pub struct DelayedTask {
    name: String,
    handle: JoinHandle<()>,
}

impl DelayedTask {
    /// Spawn `job` to run after `delay`.
    pub fn spawn<Fut>(name: impl Into<String>, delay: Duration, job: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });

        debug!(task = %name, delay_secs = delay.as_secs_f64(), "Scheduled delayed task");

        Self { name, handle }
    }

    /// Whether the job has neither run nor been cancelled.
    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the job if it has not fired yet.
    pub fn cancel(self) {
        if self.is_pending() {
            debug!(task = %self.name, "Cancelled delayed task");
        }
        // Dropping aborts.
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
