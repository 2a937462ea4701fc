//! Agent assembly and lifecycle.
//!
//! Wires the controller actor, its session and the two timers together and
//! owns the ordered shutdown:
//!
//! 1. stop the watchdog and heartbeat, waiting for any in-flight tick
//! 2. send `Shutdown`; the controller drains its mailbox, then its teardown
//!    publishes "offline" once and disconnects
//! 3. wait for the controller, forcing it down if it does not finish in time

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::actors::{
    spawn, ActorExit, ActorHandle, ActorRef, ControllerEvent, Mailbox, SwitchController,
};
use crate::actuator::Actuator;
use crate::config::{Config, Topics};
use crate::health::HealthProbe;
use crate::heartbeat::{spawn_heartbeat, HEARTBEAT_INTERVAL};
use crate::scheduler::PeriodicTask;
use crate::session::SessionManager;
use crate::transport::Transport;
use crate::watchdog::{spawn_watchdog, IdleWatchdog, WATCHDOG_INTERVAL};

/// Mailbox capacity of the controller.
pub const CONTROLLER_MAILBOX_SIZE: usize = 64;

/// How long `stop` waits for the controller teardown before forcing it.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings for the agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub topics: Topics,
    pub shutdown_delay: Duration,
    pub reconnect_delay: Duration,
    pub watchdog_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            shutdown_delay: Duration::from_secs(15 * 60),
            reconnect_delay: Duration::from_secs(30),
            watchdog_interval: WATCHDOG_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stop_timeout: STOP_TIMEOUT,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topics: config.topics.clone(),
            shutdown_delay: config.shutdown_delay,
            reconnect_delay: config.reconnect_delay,
            ..Self::default()
        }
    }
}

/// A started agent.
pub struct RunningAgent {
    controller: ActorRef,
    events: ActorHandle<ControllerEvent>,
    watchdog: PeriodicTask,
    heartbeat: PeriodicTask,
    probe: HealthProbe,
    stop_timeout: Duration,
}

impl RunningAgent {
    /// Start the controller and its timers.
    ///
    /// `events` and `mailbox` must be the pair the transport was built with,
    /// so transport events reach this controller.
    pub fn start(
        settings: AgentSettings,
        transport: Arc<dyn Transport>,
        actuator: Box<dyn Actuator>,
        events: ActorHandle<ControllerEvent>,
        mailbox: Mailbox<ControllerEvent>,
    ) -> Self {
        let session = SessionManager::new(
            transport,
            settings.topics.clone(),
            settings.reconnect_delay,
            events.clone(),
        );
        let probe = HealthProbe::new(session.watch_state());

        let controller = SwitchController::new(
            actuator,
            session,
            IdleWatchdog::new(settings.shutdown_delay),
        );
        let controller = spawn(controller, mailbox);

        let watchdog = spawn_watchdog(events.clone(), settings.watchdog_interval);
        let heartbeat = spawn_heartbeat(events.clone(), settings.heartbeat_interval);

        info!(
            state_topic = %settings.topics.state,
            command_topic = %settings.topics.command,
            shutdown_delay_secs = settings.shutdown_delay.as_secs(),
            "Switch agent started"
        );

        Self {
            controller,
            events,
            watchdog,
            heartbeat,
            probe,
            stop_timeout: settings.stop_timeout,
        }
    }

    /// Probe reporting session connectivity.
    pub fn health_probe(&self) -> HealthProbe {
        self.probe.clone()
    }

    /// Handle to the controller mailbox.
    pub fn events(&self) -> &ActorHandle<ControllerEvent> {
        &self.events
    }

    /// Wait for the controller to stop on its own. Cancel safe.
    pub async fn wait(&mut self) -> ActorExit {
        self.controller.wait().await
    }

    /// Run the ordered shutdown and return how the controller ended.
    pub async fn stop(mut self) -> ActorExit {
        info!("Stopping switch agent");

        self.watchdog.stop().await;
        self.heartbeat.stop().await;

        if self.events.send(ControllerEvent::Shutdown).await.is_err() {
            info!("Controller already stopped");
        }

        let exit = match tokio::time::timeout(self.stop_timeout, self.controller.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "Controller did not stop in time, forcing"
                );
                self.controller.stop();
                match tokio::time::timeout(self.stop_timeout, self.controller.wait()).await {
                    Ok(exit) => exit,
                    Err(_) => {
                        warn!("Controller still running, aborting");
                        self.controller.abort();
                        self.controller.wait().await
                    }
                }
            }
        };

        info!(exit = ?exit, "Switch agent stopped");
        exit
    }
}
