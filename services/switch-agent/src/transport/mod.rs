//! Message-bus transport interface.
//!
//! A transport connects to the broker, subscribes, publishes, and reports
//! what happens on the connection as [`TransportEvent`]s delivered to the
//! controller's mailbox:
//! - `mqtt`: rumqttc-backed MQTT 3.1.1 client
//! - `mock`: in-memory broker stand-in for tests and local runs

mod mock;
mod mqtt;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use mock::{MockTransport, PublishedMessage};
pub use mqtt::{LastWill, MqttSettings, MqttTransport};

/// Events a transport reports about its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the session.
    Connected,

    /// The session ended without being asked to.
    Disconnected { reason: String },

    /// A message arrived on a subscribed topic.
    MessageReceived { topic: String, payload: Vec<u8> },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

/// Message-bus transport.
///
/// All topics are used at QoS 0. `publish` is a synchronous best-effort
/// send: there is no acknowledgment and no outbound queue, and a send while
/// the connection is down fails with [`TransportError::NotConnected`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the broker. `Ok` means the broker accepted the
    /// connection; a [`TransportEvent::Connected`] follows on the event
    /// channel.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    /// Close the session. Publishes issued before this call are sent first.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
