//! Idle watchdog.
//!
//! Forces the actuator off when no command has arrived for longer than the
//! configured shutdown delay. This is what keeps the device from staying on
//! after the controlling client goes silent.
//!
//! The timer only enqueues ticks; the decision is made on the controller
//! task with [`IdleWatchdog::evaluate`], serialized with command handling.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::actors::{ActorHandle, ControllerEvent};
use crate::actuator::ActuatorState;
use crate::scheduler::PeriodicTask;

/// How often the watchdog checks for inactivity.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// No command has ever been received.
    NoActivity,
    /// The actuator is already off.
    AlreadyOff,
    /// Still inside the allowed idle period.
    WithinDelay { idle: Duration },
    /// Idle too long with the actuator on.
    ForceOff { idle: Duration },
}

/// Idle-timeout policy.
#[derive(Debug, Clone, Copy)]
pub struct IdleWatchdog {
    shutdown_delay: Duration,
}

impl IdleWatchdog {
    pub fn new(shutdown_delay: Duration) -> Self {
        Self { shutdown_delay }
    }

    pub fn shutdown_delay(&self) -> Duration {
        self.shutdown_delay
    }

    /// Decide what a tick at `now` should do.
    pub fn evaluate(
        &self,
        last_activity: Option<Instant>,
        state: ActuatorState,
        now: Instant,
    ) -> WatchdogVerdict {
        let Some(last_activity) = last_activity else {
            return WatchdogVerdict::NoActivity;
        };
        if !state.is_on() {
            return WatchdogVerdict::AlreadyOff;
        }

        let idle = now.saturating_duration_since(last_activity);
        if idle > self.shutdown_delay {
            WatchdogVerdict::ForceOff { idle }
        } else {
            WatchdogVerdict::WithinDelay { idle }
        }
    }
}

/// Start the watchdog timer, delivering ticks to the controller.
pub fn spawn_watchdog(events: ActorHandle<ControllerEvent>, interval: Duration) -> PeriodicTask {
    let mut task = PeriodicTask::new("watchdog", interval);
    task.start(move || {
        let events = events.clone();
        async move {
            match events.send(ControllerEvent::WatchdogTick).await {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => {
                    debug!(actor_id = %events.actor_id(), "Controller gone, stopping watchdog");
                    ControlFlow::Break(())
                }
            }
        }
    });
    task
}
