//! Switch controller actor - the single owner of the actuator.
//!
//! The controller:
//! - Owns the actuator, the bus session and the last-activity instant
//! - Processes transport events and timer ticks sequentially
//! - Is the only task that ever publishes
//!
//! ## Events
//!
//! ```text
//! transport pump ──┐
//! watchdog timer ──┼──> mailbox ──> SwitchController ──> SessionManager ──> bus
//! heartbeat timer ─┤                      │
//! reconnect timer ─┘                      └──> Actuator
//! ```

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::framework::{Actor, ActorContext, ActorError};
use crate::actuator::{Actuator, ActuatorError, ActuatorState};
use crate::session::{Availability, SessionManager};
use crate::transport::TransportEvent;
use crate::watchdog::{IdleWatchdog, WatchdogVerdict};

// =============================================================================
// Messages
// =============================================================================

/// Events handled by the controller.
#[derive(Debug)]
pub enum ControllerEvent {
    /// Something happened on the bus connection.
    Transport(TransportEvent),

    /// The reconnect backoff elapsed.
    ReconnectDue,

    /// Periodic idle check.
    WatchdogTick,

    /// Periodic availability and state re-announcement.
    HeartbeatTick,

    /// Tear down the session and stop.
    Shutdown,
}

impl From<TransportEvent> for ControllerEvent {
    fn from(event: TransportEvent) -> Self {
        ControllerEvent::Transport(event)
    }
}

/// A decoded command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    /// Decode a payload. Only exact `ON` and `OFF` are commands.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"ON" => Some(SwitchCommand::On),
            b"OFF" => Some(SwitchCommand::Off),
            _ => None,
        }
    }

    fn target(self) -> ActuatorState {
        match self {
            SwitchCommand::On => ActuatorState::On,
            SwitchCommand::Off => ActuatorState::Off,
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Controller actor bridging bus commands to the actuator.
pub struct SwitchController {
    actuator: Box<dyn Actuator>,
    session: SessionManager,
    watchdog: IdleWatchdog,
    state: ActuatorState,
    last_activity: Option<Instant>,
}

impl SwitchController {
    /// Create a controller. The actuator is read and switched off when the
    /// actor starts.
    pub fn new(actuator: Box<dyn Actuator>, session: SessionManager, watchdog: IdleWatchdog) -> Self {
        Self {
            actuator,
            session,
            watchdog,
            state: ActuatorState::Off,
            last_activity: None,
        }
    }

    /// Current actuator state as last applied.
    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// When the last command-topic message arrived.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    async fn handle_transport(&mut self, event: TransportEvent) -> Result<(), ActorError> {
        match event {
            TransportEvent::Connected => {
                self.session.on_connected().await;
                Ok(())
            }
            TransportEvent::Disconnected { reason } => {
                self.session.on_disconnected(&reason);
                Ok(())
            }
            TransportEvent::MessageReceived { topic, payload } => {
                if topic != self.session.topics().command {
                    debug!(topic = %topic, "Ignoring message on unexpected topic");
                    return Ok(());
                }
                self.handle_command(&payload)
            }
        }
    }

    /// Reconcile a command-topic message with the actuator.
    fn handle_command(&mut self, payload: &[u8]) -> Result<(), ActorError> {
        self.record_activity(Instant::now());

        match SwitchCommand::parse(payload) {
            Some(command) => {
                info!(command = ?command, state = %self.state, "Received command");
                self.apply(command.target())?;
            }
            None => {
                warn!(
                    payload = %String::from_utf8_lossy(payload),
                    "Unrecognized command payload"
                );
            }
        }

        self.publish_state();
        Ok(())
    }

    fn handle_watchdog_tick(&mut self) -> Result<(), ActorError> {
        match self.watchdog.evaluate(self.last_activity, self.state, Instant::now()) {
            WatchdogVerdict::ForceOff { idle } => {
                warn!(
                    idle_secs = idle.as_secs(),
                    shutdown_delay_secs = self.watchdog.shutdown_delay().as_secs(),
                    "No activity within shutdown delay, forcing actuator off"
                );
                self.apply(ActuatorState::Off)?;
                self.publish_state();
            }
            WatchdogVerdict::WithinDelay { idle } => {
                debug!(idle_secs = idle.as_secs(), "Watchdog check passed");
            }
            WatchdogVerdict::NoActivity | WatchdogVerdict::AlreadyOff => {}
        }
        Ok(())
    }

    fn handle_heartbeat_tick(&self) {
        debug!(state = %self.state, "Heartbeat");
        self.session.log_publish(
            "availability",
            self.session.publish_availability(Availability::Online),
        );
        self.publish_state();
    }

    fn record_activity(&mut self, now: Instant) {
        self.last_activity = Some(match self.last_activity {
            Some(previous) => previous.max(now),
            None => now,
        });
    }

    /// Drive the actuator to `target`. No-op when already there.
    fn apply(&mut self, target: ActuatorState) -> Result<(), ActorError> {
        if self.state == target {
            debug!(state = %target, "Actuator already in requested state");
            return Ok(());
        }

        let result = match target {
            ActuatorState::On => self.actuator.turn_on(),
            ActuatorState::Off => self.actuator.turn_off(),
        };
        result.map_err(|e| actuator_failure(self.actuator.name(), e))?;

        info!(from = %self.state, to = %target, actuator = self.actuator.name(), "Actuator switched");
        self.state = target;
        Ok(())
    }

    fn publish_state(&self) {
        self.session
            .log_publish("state", self.session.publish_state(self.state));
    }
}

fn actuator_failure(name: &str, e: ActuatorError) -> ActorError {
    error!(actuator = name, error = %e, "Actuator failure");
    ActorError::Permanent(format!("actuator {name}: {e}"))
}

#[async_trait]
impl Actor for SwitchController {
    type Message = ControllerEvent;

    fn name(&self) -> &str {
        "switch_controller"
    }

    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        self.state = self
            .actuator
            .read_state()
            .map_err(|e| actuator_failure(self.actuator.name(), e))?;

        info!(
            actor_id = %ctx.actor_id,
            actuator = self.actuator.name(),
            state = %self.state,
            "Switch controller starting"
        );

        // Nothing bounds an "on" that no command asked for, so start off.
        if self.state.is_on() {
            warn!("Actuator found on at startup, switching off");
            self.apply(ActuatorState::Off)?;
        }

        self.session.connect().await;
        Ok(())
    }

    async fn handle(&mut self, msg: ControllerEvent, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        match msg {
            ControllerEvent::Transport(event) => self.handle_transport(event).await?,
            ControllerEvent::ReconnectDue => {
                info!("Reconnecting to MQTT broker");
                self.session.connect().await;
            }
            ControllerEvent::WatchdogTick => self.handle_watchdog_tick()?,
            ControllerEvent::HeartbeatTick => self.handle_heartbeat_tick(),
            ControllerEvent::Shutdown => {
                info!("Switch controller shutting down");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext) {
        self.session.stop().await;
        info!(
            actor_id = %ctx.actor_id,
            state = %self.state,
            "Switch controller stopped"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
