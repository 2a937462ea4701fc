//! Heartbeat timer.
//!
//! Periodically re-announces availability and re-publishes the actuator
//! state so late subscribers and retained-message consumers converge. The
//! timer only enqueues ticks; the publishing happens on the controller task.

use std::ops::ControlFlow;
use std::time::Duration;

use tracing::debug;

use crate::actors::{ActorHandle, ControllerEvent};
use crate::scheduler::PeriodicTask;

/// Interval between heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Start the heartbeat timer, delivering ticks to the controller.
pub fn spawn_heartbeat(events: ActorHandle<ControllerEvent>, interval: Duration) -> PeriodicTask {
    let mut task = PeriodicTask::new("heartbeat", interval);
    task.start(move || {
        let events = events.clone();
        async move {
            if events.send(ControllerEvent::HeartbeatTick).await.is_err() {
                debug!(actor_id = %events.actor_id(), "Controller gone, stopping heartbeat");
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
    });
    task
}
