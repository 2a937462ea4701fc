//! Mock transport for testing and development.
//!
//! Stands in for both the client and the broker: it records what was
//! published and subscribed, can refuse connection attempts, and can inject
//! inbound messages and connection loss.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Transport, TransportError, TransportEvent};
use crate::actors::{ActorError, ActorHandle, ControllerEvent};

/// A message as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct MockBroker {
    connected: bool,
    failing_connects: u32,
    connect_attempts: u32,
    disconnects: u32,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    dropped: Vec<PublishedMessage>,
    last_will: Option<PublishedMessage>,
}

/// Mock transport. Clones share the same broker state.
#[derive(Clone)]
pub struct MockTransport {
    broker: Arc<Mutex<MockBroker>>,
    events: ActorHandle<ControllerEvent>,
}

impl MockTransport {
    /// Create a mock transport reporting to `events`.
    pub fn new(events: ActorHandle<ControllerEvent>) -> Self {
        Self {
            broker: Arc::new(Mutex::new(MockBroker::default())),
            events,
        }
    }

    /// Register a last-will message the broker publishes on connection loss.
    pub fn with_last_will(self, topic: &str, payload: &str) -> Self {
        self.lock().last_will = Some(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain: false,
        });
        self
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Whether the mock broker currently holds a session.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Number of connection attempts so far.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Number of explicit disconnects so far.
    pub fn disconnect_count(&self) -> u32 {
        self.lock().disconnects
    }

    /// Topics subscribed so far, one entry per subscribe call.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// Everything the broker received, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Payloads the broker received on `topic`, in order.
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Publishes rejected because the connection was down.
    pub fn dropped(&self) -> Vec<PublishedMessage> {
        self.lock().dropped.clone()
    }

    /// Forget everything recorded so far.
    pub fn clear_log(&self) {
        let mut broker = self.lock();
        broker.published.clear();
        broker.dropped.clear();
        broker.subscriptions.clear();
    }

    /// Deliver an inbound message as if it arrived from the broker.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> Result<(), ActorError> {
        self.events
            .send(ControllerEvent::from(TransportEvent::MessageReceived {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            }))
            .await
    }

    /// Drop the connection as if the network failed.
    pub async fn drop_connection(&self, reason: &str) -> Result<(), ActorError> {
        {
            let mut broker = self.lock();
            broker.connected = false;
            if let Some(will) = broker.last_will.clone() {
                broker.published.push(will);
            }
        }
        info!(reason, "[MOCK] Connection dropped");
        self.events
            .send(ControllerEvent::from(TransportEvent::Disconnected {
                reason: reason.to_string(),
            }))
            .await
    }

    fn lock(&self) -> MutexGuard<'_, MockBroker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        {
            let mut broker = self.lock();
            broker.connect_attempts += 1;
            if broker.failing_connects > 0 {
                broker.failing_connects -= 1;
                return Err(TransportError::Connect(
                    "mock broker refused connection".to_string(),
                ));
            }
            broker.connected = true;
        }

        info!("[MOCK] Connected");

        // Delivered from another task, like the MQTT event pump.
        let events = self.events.clone();
        tokio::spawn(async move {
            if events
                .send(ControllerEvent::from(TransportEvent::Connected))
                .await
                .is_err()
            {
                debug!("[MOCK] Controller gone before connect event");
            }
        });

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut broker = self.lock();
        if !broker.connected {
            return Err(TransportError::NotConnected);
        }
        broker.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        };

        let mut broker = self.lock();
        if !broker.connected {
            broker.dropped.push(message);
            return Err(TransportError::NotConnected);
        }
        broker.published.push(message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.connected = false;
        broker.disconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::mailbox;

    #[tokio::test]
    async fn test_mock_connect_and_publish() {
        let (events, mut mailbox) = mailbox::<ControllerEvent>("test", 8);
        let transport = MockTransport::new(events);

        assert!(transport.publish("t", b"early", false).is_err());
        transport.connect().await.unwrap();
        transport.publish("t", b"ON", true).unwrap();

        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(transport.payloads_on("t"), vec!["ON"]);
        assert_eq!(transport.dropped().len(), 1);
        assert!(matches!(
            mailbox.recv().await,
            Some(ControllerEvent::Transport(TransportEvent::Connected))
        ));
    }

    #[tokio::test]
    async fn test_mock_failing_connects() {
        let (events, _mailbox) = mailbox::<ControllerEvent>("test", 8);
        let transport = MockTransport::new(events);
        transport.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_attempts(), 3);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_mock_drop_connection_publishes_last_will() {
        let (events, mut mailbox) = mailbox::<ControllerEvent>("test", 8);
        let transport = MockTransport::new(events).with_last_will("avail", "offline");
        transport.connect().await.unwrap();
        let _ = mailbox.recv().await;

        transport.drop_connection("reset by peer").await.unwrap();

        assert!(!transport.is_connected());
        assert_eq!(transport.payloads_on("avail"), vec!["offline"]);
        assert!(matches!(
            mailbox.recv().await,
            Some(ControllerEvent::Transport(TransportEvent::Disconnected { .. }))
        ));
    }
}
