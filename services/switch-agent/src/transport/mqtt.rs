//! MQTT transport backed by rumqttc.
//!
//! rumqttc drives the connection from an [`EventLoop`] that must be polled.
//! `connect` builds a fresh client and event loop, polls the loop until the
//! broker acknowledges the session, then hands it to an event pump task that
//! forwards inbound publishes and connection loss to the controller. When
//! the connection fails the pump exits and drops its event loop together
//! with any requests still queued for it, so nothing from a lost connection
//! is sent on the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Transport, TransportError, TransportEvent};
use crate::actors::{ActorHandle, ControllerEvent};

/// Capacity of the rumqttc request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// How long `disconnect` waits for the pump to flush and exit.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Message the broker publishes on our behalf if the session is lost.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
}

/// Connection settings for [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker host name or address.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Client identifier.
    pub client_id: String,

    /// Keepalive interval.
    pub keepalive: Duration,

    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,

    /// Optional last-will message.
    pub last_will: Option<LastWill>,
}

impl MqttSettings {
    fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keepalive);
        options.set_clean_session(true);
        if let Some(will) = &self.last_will {
            options.set_last_will(rumqttc::LastWill::new(
                &will.topic,
                will.payload.as_bytes().to_vec(),
                QoS::AtMostOnce,
                false,
            ));
        }
        options
    }
}

/// rumqttc-backed transport.
pub struct MqttTransport {
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    events: ActorHandle<ControllerEvent>,
    settings: MqttSettings,
}

impl MqttTransport {
    /// Create a transport reporting to `events`. No connection is made
    /// until [`Transport::connect`] is called.
    pub fn new(settings: MqttSettings, events: ActorHandle<ControllerEvent>) -> Self {
        Self {
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
            events,
            settings,
        }
    }

    /// Whether the session is up and can carry a publish.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Client of the live connection.
    fn live_client(&self) -> Result<AsyncClient, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        lock(&self.client).clone().ok_or(TransportError::NotConnected)
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        lock(&self.pump).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if let Some(stale) = self.take_pump() {
            stale.abort();
        }
        lock(&self.client).take();
        self.connected.store(false, Ordering::SeqCst);
        self.closing.store(false, Ordering::SeqCst);

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "Connecting to MQTT broker"
        );

        let (client, mut eventloop) =
            AsyncClient::new(self.settings.to_options(), REQUEST_CHANNEL_CAPACITY);
        let ack = tokio::time::timeout(self.settings.connect_timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout(self.settings.connect_timeout))??;

        debug!(session_present = ack.session_present, "MQTT session acknowledged");
        *lock(&self.client) = Some(client);
        self.connected.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(run_event_pump(
            eventloop,
            Arc::clone(&self.connected),
            Arc::clone(&self.closing),
            self.events.clone(),
        ));
        *lock(&self.pump) = Some(pump);

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.live_client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        self.live_client()?
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let client = lock(&self.client).take();

        let result = match client {
            Some(client) if was_connected => client
                .try_disconnect()
                .map_err(|e| TransportError::Disconnect(e.to_string())),
            _ => Ok(()),
        };

        if let Some(pump) = self.take_pump() {
            let abort = pump.abort_handle();
            if tokio::time::timeout(DISCONNECT_TIMEOUT, pump).await.is_err() {
                warn!("MQTT event pump did not exit in time, aborting");
                abort.abort();
            }
        }

        info!("Disconnected from MQTT broker");
        result
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<ConnAck, TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

/// Poll the event loop until the connection ends, forwarding events.
async fn run_event_pump(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    events: ActorHandle<ControllerEvent>,
) {
    if events
        .send(ControllerEvent::from(TransportEvent::Connected))
        .await
        .is_err()
    {
        return;
    }

    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "MQTT message received");
                let event = TransportEvent::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if events.send(ControllerEvent::from(event)).await.is_err() {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                break "broker closed the session".to_string();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if closing.load(Ordering::SeqCst) => {
                debug!("MQTT disconnect sent");
                connected.store(false, Ordering::SeqCst);
                return;
            }
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    connected.store(false, Ordering::SeqCst);
    if closing.load(Ordering::SeqCst) {
        return;
    }

    warn!(reason = %reason, "MQTT connection lost");
    let _ = events
        .send(ControllerEvent::from(TransportEvent::Disconnected { reason }))
        .await;
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::actors::mailbox;

    /// Accept one client, read its CONNECT and acknowledge it.
    async fn accept_session(listener: &TcpListener) -> (TcpStream, u8) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0);
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        (socket, buf[0])
    }

    fn settings() -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "switch-test".to_string(),
            keepalive: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(2),
            last_will: Some(LastWill {
                topic: "home/kotel/availability".to_string(),
                payload: "offline".to_string(),
            }),
        }
    }

    #[test]
    fn test_options_from_settings() {
        let options = settings().to_options();
        assert_eq!(options.client_id(), "switch-test");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1));
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "home/kotel/availability");
        assert_eq!(&will.message[..], b"offline");
        assert!(!will.retain);
    }

    #[tokio::test]
    async fn test_publish_refused_before_connect() {
        let (events, _mailbox) = mailbox::<ControllerEvent>("test", 4);
        let transport = MqttTransport::new(settings(), events);

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("home/kotel", b"ON", true),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe("home/kotel/set").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (events, _mailbox) = mailbox::<ControllerEvent>("test", 4);
        let transport = MqttTransport::new(settings(), events);

        // Nothing listens on port 1.
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Timeout(_)
        ));
        assert!(!transport.is_connected());
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_lost_connection_discards_queued_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events, mut mailbox) = mailbox::<ControllerEvent>("test", 8);
        let transport = MqttTransport::new(MqttSettings { port, ..settings() }, events);

        let (first, connected) = tokio::join!(accept_session(&listener), transport.connect());
        connected.unwrap();
        let (socket, packet_type) = first;
        assert_eq!(packet_type, 0x10);
        assert!(matches!(
            mailbox.recv().await,
            Some(ControllerEvent::Transport(TransportEvent::Connected))
        ));

        // Queued, then the broker goes away before reading it.
        transport.publish("home/kotel", b"ON", true).unwrap();
        drop(socket);
        assert!(matches!(
            mailbox.recv().await,
            Some(ControllerEvent::Transport(TransportEvent::Disconnected { .. }))
        ));
        assert!(matches!(
            transport.publish("home/kotel", b"OFF", true),
            Err(TransportError::NotConnected)
        ));

        let (second, connected) = tokio::join!(accept_session(&listener), transport.connect());
        connected.unwrap();
        let (mut socket, packet_type) = second;
        assert_eq!(packet_type, 0x10);

        let mut buf = [0u8; 64];
        let late = tokio::time::timeout(Duration::from_millis(300), socket.read(&mut buf)).await;
        assert!(late.is_err(), "requests from the lost connection were replayed");

        transport.disconnect().await.unwrap();
    }
}
