//! Bus session lifecycle.
//!
//! The session manager owns the transport on behalf of the controller:
//! - connects, and retries at a fixed delay when the broker is unreachable
//! - announces availability and subscribes on every new connection
//! - publishes state and availability, dropping sends while disconnected
//! - tears the session down in order on shutdown

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::actors::{ActorHandle, ControllerEvent};
use crate::actuator::ActuatorState;
use crate::config::Topics;
use crate::scheduler::DelayedTask;
use crate::transport::{Transport, TransportError};

/// Connection state of the bus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Payload of the availability topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_payload(&self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The send was dropped because the session is not connected.
    #[error("session not connected, publish dropped")]
    NotConnected,

    /// The session has been shut down.
    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => SessionError::NotConnected,
            other => SessionError::Transport(other),
        }
    }
}

/// Owns the bus connection for the controller.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    topics: Topics,
    state: watch::Sender<SessionState>,
    reconnect_delay: Duration,
    pending_reconnect: Option<DelayedTask>,
    events: ActorHandle<ControllerEvent>,
    closed: bool,
}

impl SessionManager {
    /// Create a session manager. Reconnect timers report back through `events`.
    pub fn new(
        transport: Arc<dyn Transport>,
        topics: Topics,
        reconnect_delay: Duration,
        events: ActorHandle<ControllerEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            topics,
            state,
            reconnect_delay,
            pending_reconnect: None,
            events,
            closed: false,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that follows the session state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Topic names in use.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Whether a reconnect attempt is scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect
            .as_ref()
            .is_some_and(DelayedTask::is_pending)
    }

    /// Attempt a connection. On failure, schedule another attempt after the
    /// reconnect delay. Never fails.
    pub async fn connect(&mut self) {
        if self.closed {
            debug!("Session closed, not connecting");
            return;
        }
        if self.state() == SessionState::Connected {
            debug!("Already connected, ignoring connect request");
            return;
        }

        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }
        self.state.send_replace(SessionState::Connecting);

        match self.transport.connect().await {
            Ok(()) => {
                debug!("Transport connected, waiting for session event");
            }
            Err(e) => {
                error!(
                    error = %e,
                    retry_in_secs = self.reconnect_delay.as_secs(),
                    "Could not connect to MQTT broker, will retry"
                );
                self.state.send_replace(SessionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    /// Handle a newly established connection.
    pub async fn on_connected(&mut self) {
        if self.closed {
            return;
        }

        self.state.send_replace(SessionState::Connected);
        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }

        self.log_publish("availability", self.publish_availability(Availability::Online));

        match self.transport.subscribe(&self.topics.command).await {
            Ok(()) => info!(topic = %self.topics.command, "Subscribed to command topic"),
            Err(e) => error!(topic = %self.topics.command, error = %e, "Failed to subscribe to command topic"),
        }

        info!(availability_topic = %self.topics.availability, "Connected to MQTT broker");
    }

    /// Handle unexpected connection loss.
    pub fn on_disconnected(&mut self, reason: &str) {
        warn!(reason = %reason, "Disconnected from MQTT broker");

        // Best effort; the broker's last-will covers the usual case where
        // the connection can no longer carry it.
        self.log_publish("availability", self.publish_availability(Availability::Offline));
        self.state.send_replace(SessionState::Disconnected);

        if !self.closed {
            self.schedule_reconnect();
        }
    }

    /// Publish the actuator state, retained.
    pub fn publish_state(&self, state: ActuatorState) -> Result<(), SessionError> {
        debug!(topic = %self.topics.state, state = %state, "Publishing state");
        self.publish(&self.topics.state, state.as_payload(), true)
    }

    /// Publish availability, not retained.
    pub fn publish_availability(&self, availability: Availability) -> Result<(), SessionError> {
        debug!(topic = %self.topics.availability, availability = %availability, "Publishing availability");
        self.publish(&self.topics.availability, availability.as_payload(), false)
    }

    /// Ordered teardown: cancel reconnects, announce offline, disconnect.
    /// Nothing is published afterwards.
    pub async fn stop(&mut self) {
        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }

        self.log_publish("availability", self.publish_availability(Availability::Offline));
        self.closed = true;

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        self.state.send_replace(SessionState::Disconnected);
        info!("Session stopped");
    }

    /// Log the outcome of a publish that has no caller to report to.
    pub fn log_publish(&self, what: &str, result: Result<(), SessionError>) {
        match result {
            Ok(()) => {}
            Err(SessionError::NotConnected) => debug!(what, "Dropped publish while disconnected"),
            Err(SessionError::Closed) => debug!(what, "Dropped publish after shutdown"),
            Err(e) => warn!(what, error = %e, "Publish failed"),
        }
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.transport
            .publish(topic, payload.as_bytes(), retain)
            .map_err(SessionError::from)
    }

    fn schedule_reconnect(&mut self) {
        let events = self.events.clone();
        self.pending_reconnect = Some(DelayedTask::spawn(
            "mqtt_reconnect",
            self.reconnect_delay,
            async move {
                if events.send(ControllerEvent::ReconnectDue).await.is_err() {
                    debug!("Controller gone, dropping reconnect");
                }
            },
        ));
    }
}
