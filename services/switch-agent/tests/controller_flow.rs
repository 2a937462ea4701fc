//! Integration tests for the switch agent.
//!
//! These run the full agent (controller actor, timers, session) against the
//! mock transport and mock actuator on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use mqtt_switch_agent::actors::{mailbox, ActorExit, ControllerEvent};
use mqtt_switch_agent::agent::{AgentSettings, RunningAgent};
use mqtt_switch_agent::{ActuatorState, MockActuator, MockTransport};

const STATE: &str = "home/kotel";
const COMMAND: &str = "home/kotel/set";
const AVAILABILITY: &str = "home/kotel/availability";

const MINUTE: Duration = Duration::from_secs(60);

struct Harness {
    agent: RunningAgent,
    transport: MockTransport,
    actuator: MockActuator,
}

/// Settings with the heartbeat pushed out of the way.
fn quiet_settings() -> AgentSettings {
    AgentSettings {
        heartbeat_interval: Duration::from_secs(24 * 3600),
        ..AgentSettings::default()
    }
}

fn start_with(
    settings: AgentSettings,
    transport_setup: impl FnOnce(&MockTransport),
    actuator: MockActuator,
) -> Harness {
    let (events, controller_mailbox) = mailbox::<ControllerEvent>("switch_controller", 64);
    let transport = MockTransport::new(events.clone()).with_last_will(AVAILABILITY, "offline");
    transport_setup(&transport);

    let agent = RunningAgent::start(
        settings,
        Arc::new(transport.clone()),
        Box::new(actuator.clone()),
        events,
        controller_mailbox,
    );

    Harness {
        agent,
        transport,
        actuator,
    }
}

fn start(settings: AgentSettings) -> Harness {
    start_with(settings, |_| {}, MockActuator::new())
}

/// Let spawned tasks run without moving the clock meaningfully.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn send_command(h: &Harness, payload: &str) {
    h.transport.deliver(COMMAND, payload.as_bytes()).await.unwrap();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_announces_online_and_subscribes() {
    let h = start(quiet_settings());
    settle().await;

    assert_eq!(h.transport.connect_attempts(), 1);
    assert_eq!(h.transport.subscriptions(), vec![COMMAND]);
    assert_eq!(h.transport.payloads_on(AVAILABILITY), vec!["online"]);
    assert!(h.agent.health_probe().is_healthy());

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_drive_actuator_and_state() {
    let h = start(quiet_settings());
    settle().await;

    send_command(&h, "ON").await;
    send_command(&h, "ON").await;
    send_command(&h, "OFF").await;
    send_command(&h, "ON").await;

    assert_eq!(
        h.actuator.transitions(),
        vec![ActuatorState::On, ActuatorState::Off, ActuatorState::On]
    );
    assert_eq!(h.transport.payloads_on(STATE), vec!["ON", "ON", "OFF", "ON"]);
    assert!(h
        .transport
        .published()
        .iter()
        .filter(|m| m.topic == STATE)
        .all(|m| m.retain));
    assert_eq!(h.actuator.state(), ActuatorState::On);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_payload_republishes_without_actuating() {
    let h = start(quiet_settings());
    settle().await;

    send_command(&h, "ON").await;
    send_command(&h, "maybe").await;

    assert_eq!(h.actuator.transitions(), vec![ActuatorState::On]);
    assert_eq!(h.transport.payloads_on(STATE), vec!["ON", "ON"]);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_forces_off_after_idle_delay() {
    let h = start(quiet_settings());
    settle().await;

    send_command(&h, "ON").await;

    // Just short of the delay the actuator stays on.
    tokio::time::sleep(15 * MINUTE - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(h.actuator.state(), ActuatorState::On);

    tokio::time::sleep(MINUTE + Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(h.actuator.state(), ActuatorState::Off);
    assert_eq!(h.transport.payloads_on(STATE), vec!["ON", "OFF"]);

    // Already off: later ticks publish nothing.
    tokio::time::sleep(10 * MINUTE).await;
    assert_eq!(h.transport.payloads_on(STATE), vec!["ON", "OFF"]);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recent_activity_keeps_actuator_on() {
    let h = start(quiet_settings());
    settle().await;

    send_command(&h, "ON").await;
    for _ in 0..4 {
        tokio::time::sleep(10 * MINUTE).await;
        send_command(&h, "ON").await;
    }

    assert_eq!(h.actuator.transitions(), vec![ActuatorState::On]);
    assert_eq!(h.actuator.state(), ActuatorState::On);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_startup_switches_actuator_off() {
    let h = start_with(
        quiet_settings(),
        |_| {},
        MockActuator::with_state(ActuatorState::On),
    );
    settle().await;

    assert_eq!(h.actuator.state(), ActuatorState::Off);
    assert_eq!(h.actuator.transitions(), vec![ActuatorState::Off]);

    tokio::time::sleep(60 * MINUTE).await;
    assert_eq!(h.actuator.transitions(), vec![ActuatorState::Off]);
    assert!(h.transport.payloads_on(STATE).is_empty());

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_publishes_online_and_state_each_interval() {
    let h = start(AgentSettings::default());
    settle().await;
    h.transport.clear_log();

    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;

    assert_eq!(h.transport.payloads_on(AVAILABILITY), vec!["online"; 3]);
    assert_eq!(h.transport.payloads_on(STATE), vec!["OFF"; 3]);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_publishes_offline_last() {
    let h = start(AgentSettings::default());
    settle().await;
    send_command(&h, "ON").await;

    let transport = h.transport.clone();
    let events = h.agent.events().clone();
    let exit = h.agent.stop().await;

    assert_eq!(exit, ActorExit::Stopped);
    let published = transport.published();
    let last = published.last().unwrap();
    assert_eq!(last.topic, AVAILABILITY);
    assert_eq!(last.payload, "offline");
    assert_eq!(transport.payloads_on(AVAILABILITY), vec!["online", "offline"]);
    assert_eq!(transport.disconnect_count(), 1);

    // Nothing is accepted or published afterwards.
    assert!(events.send(ControllerEvent::HeartbeatTick).await.is_err());
    tokio::time::sleep(5 * MINUTE).await;
    assert_eq!(transport.published().len(), published.len());
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_is_retried_after_backoff() {
    let h = start_with(quiet_settings(), |t| t.fail_next_connects(1), MockActuator::new());
    settle().await;

    assert_eq!(h.transport.connect_attempts(), 1);
    assert!(!h.agent.health_probe().is_healthy());
    assert!(h.transport.subscriptions().is_empty());

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(h.transport.connect_attempts(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(h.transport.connect_attempts(), 2);
    assert!(h.agent.health_probe().is_healthy());
    assert_eq!(h.transport.subscriptions(), vec![COMMAND]);
    assert_eq!(h.transport.payloads_on(AVAILABILITY), vec!["online"]);

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_reconnect() {
    let h = start_with(quiet_settings(), |t| t.fail_next_connects(1), MockActuator::new());
    settle().await;
    assert_eq!(h.transport.connect_attempts(), 1);

    let transport = h.transport.clone();
    let exit = h.agent.stop().await;
    assert_eq!(exit, ActorExit::Stopped);

    tokio::time::sleep(5 * MINUTE).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_unhealthy_until_reconnected() {
    let h = start(quiet_settings());
    settle().await;
    let probe = h.agent.health_probe();
    assert!(probe.is_healthy());

    h.transport.drop_connection("connection reset").await.unwrap();
    settle().await;

    assert!(!probe.is_healthy());
    // Our own offline could not go out; the last will did.
    assert_eq!(h.transport.dropped()[0].payload, "offline");
    assert_eq!(h.transport.payloads_on(AVAILABILITY), vec!["online", "offline"]);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(!probe.is_healthy());

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert!(probe.is_healthy());
    assert_eq!(h.transport.subscriptions(), vec![COMMAND, COMMAND]);
    assert_eq!(
        h.transport.payloads_on(AVAILABILITY),
        vec!["online", "offline", "online"]
    );

    h.agent.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_actuator_failure_stops_agent() {
    let mut h = start_with(quiet_settings(), |_| {}, MockActuator::failing());
    settle().await;

    h.transport.deliver(COMMAND, b"ON").await.unwrap();
    let exit = h.agent.wait().await;

    assert!(matches!(exit, ActorExit::Failed(_)));
    assert_eq!(h.transport.payloads_on(AVAILABILITY), vec!["online", "offline"]);
    assert_eq!(h.transport.disconnect_count(), 1);

    // Stopping afterwards reports the same failure.
    assert!(!h.agent.stop().await.is_clean());
}
