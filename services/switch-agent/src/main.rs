//! MQTT switch agent
//!
//! Drives a relay from MQTT commands and forces it off after a period
//! without commands.
//!
//! ## Architecture
//!
//! - **Controller**: actor owning the actuator and the MQTT session
//! - **Watchdog**: forces the actuator off after the idle delay
//! - **Heartbeat**: re-announces availability and state
//! - **Health server**: `GET /health`, 200 while connected to the broker

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use mqtt_switch_agent::actors::{mailbox, ControllerEvent};
use mqtt_switch_agent::agent::{AgentSettings, RunningAgent, CONTROLLER_MAILBOX_SIZE};
use mqtt_switch_agent::{actuator, health, logging, signals, Config, MqttTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;

    // Initialize tracing
    logging::init(&config.log_level, config.log_format)?;

    info!("Starting MQTT switch agent");
    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        client_id = %config.mqtt.client_id,
        gpio_backend = %config.gpio.backend,
        gpio_pin = config.gpio.pin,
        "Configuration loaded"
    );

    if let Some(factory) = &config.gpio.pin_factory {
        info!(
            pin_factory = %factory,
            gpio_backend = %config.gpio.backend,
            "Mapped gpiozero pin factory to gpio backend"
        );
    }

    // Exporting a sysfs line waits on udev, so keep it off the runtime workers.
    let gpio = config.gpio.clone();
    let actuator = tokio::task::spawn_blocking(move || actuator::open(&gpio))
        .await
        .context("actuator open task failed")?
        .with_context(|| format!("failed to open {} actuator", config.gpio.backend))?;

    let (events, controller_mailbox) =
        mailbox::<ControllerEvent>("switch_controller", CONTROLLER_MAILBOX_SIZE);
    let transport = Arc::new(MqttTransport::new(config.mqtt.clone(), events.clone()));

    let mut agent = RunningAgent::start(
        AgentSettings::from_config(&config),
        transport,
        actuator,
        events,
        controller_mailbox,
    );

    // Start the health server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health_handle = tokio::spawn(health::serve(
        config.health_listen_addr,
        agent.health_probe(),
        shutdown_rx,
    ));

    // Wait for a shutdown signal or for the controller to give up
    let stopped_early = tokio::select! {
        result = signals::wait_for_shutdown_signal() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signals");
            }
            false
        }
        exit = agent.wait() => {
            error!(exit = ?exit, "Controller stopped unexpectedly");
            true
        }
    };

    let exit = agent.stop().await;

    let _ = shutdown_tx.send(true);
    match health_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health server error"),
        Err(e) => error!(error = %e, "Health server task panicked"),
    }

    if stopped_early || !exit.is_clean() {
        bail!("switch agent stopped abnormally: {exit:?}");
    }

    info!("Switch agent shutdown complete");
    Ok(())
}
