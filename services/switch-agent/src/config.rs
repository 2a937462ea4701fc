//! Configuration for the switch agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::actuator::{ActuatorBackend, GpioConfig};
use crate::transport::{LastWill, MqttSettings};

/// Upper bound on a single broker connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Topic names used on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Retained actuator state.
    pub state: String,

    /// Subscribed command topic.
    pub command: String,

    /// Online/offline announcements.
    pub availability: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            state: "home/kotel".to_string(),
            command: "home/kotel/set".to_string(),
            availability: "home/kotel/availability".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other}, expected json or pretty")),
        }
    }
}

/// Switch agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection settings, last will included.
    pub mqtt: MqttSettings,

    /// Topic names.
    pub topics: Topics,

    /// Actuator settings.
    pub gpio: GpioConfig,

    /// Idle period after which the actuator is forced off.
    pub shutdown_delay: Duration,

    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,

    /// Health server bind address.
    pub health_listen_addr: SocketAddr,

    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let topics = Topics {
            state: env.string("MQTT_TOPIC", "home/kotel"),
            command: env.string("MQTT_TOPIC_SUB", "home/kotel/set"),
            availability: env.string("MQTT_TOPIC_AVAILABILITY", "home/kotel/availability"),
        };

        let mqtt = MqttSettings {
            host: env.string("MQTT_HOST", "127.0.0.1"),
            port: env.parse("MQTT_PORT", 1883)?,
            client_id: env
                .get("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("mqtt-switch-{}", std::process::id())),
            keepalive: Duration::from_secs(env.parse("MQTT_KEEPALIVE_INTERVAL", 45)?),
            connect_timeout: CONNECT_TIMEOUT,
            last_will: Some(LastWill {
                topic: topics.availability.clone(),
                payload: "offline".to_string(),
            }),
        };

        // GPIOZERO_PIN_FACTORY is the older name for the backend selector.
        let backend_var = if env.get("GPIO_BACKEND").is_some() {
            "GPIO_BACKEND"
        } else {
            "GPIOZERO_PIN_FACTORY"
        };
        let defaults = GpioConfig::default();
        let pin_factory = env
            .get(backend_var)
            .filter(|name| ActuatorBackend::is_pin_factory_alias(name))
            .map(|name| name.trim().to_ascii_lowercase());
        let gpio = GpioConfig {
            backend: env.parse::<ActuatorBackend>(backend_var, defaults.backend)?,
            pin: env.parse("GPIO_ID", defaults.pin)?,
            active_low: env.flag("GPIO_ACTIVE_LOW", defaults.active_low)?,
            sysfs_root: env
                .get("GPIO_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.sysfs_root),
            pin_factory,
        };

        let shutdown_minutes = env.parse::<u64>("AUTOMATIC_SHUTDOWN_DELAY", 15)?;
        let shutdown_delay = shutdown_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                var: "AUTOMATIC_SHUTDOWN_DELAY",
                value: shutdown_minutes.to_string(),
                reason: "too many minutes".to_string(),
            })?;

        Ok(Self {
            mqtt,
            topics,
            gpio,
            shutdown_delay,
            reconnect_delay: Duration::from_secs(env.parse("MQTT_RECONNECT_DELAY", 30)?),
            health_listen_addr: env.parse("HEALTH_LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?,
            log_level: env.string("SWITCH_LOG_LEVEL", "info"),
            log_format: env.parse("SWITCH_LOG_FORMAT", LogFormat::default())?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(var) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.mqtt.host, "127.0.0.1");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keepalive, Duration::from_secs(45));
        assert!(config.mqtt.client_id.starts_with("mqtt-switch-"));
        assert_eq!(config.topics, Topics::default());
        assert_eq!(config.shutdown_delay, Duration::from_secs(15 * 60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.gpio.pin, 21);
        assert_eq!(config.gpio.backend, ActuatorBackend::Sysfs);
        assert_eq!(config.health_listen_addr.port(), 5000);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_last_will_follows_availability_topic() {
        let config = load(&[("MQTT_TOPIC_AVAILABILITY", "garage/door/availability")]).unwrap();

        let will = config.mqtt.last_will.unwrap();
        assert_eq!(will.topic, "garage/door/availability");
        assert_eq!(will.payload, "offline");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("MQTT_CLIENT_ID", "kotel"),
            ("AUTOMATIC_SHUTDOWN_DELAY", "1"),
            ("GPIO_ID", "17"),
            ("GPIO_ACTIVE_LOW", "true"),
            ("SWITCH_LOG_FORMAT", "pretty"),
        ])
        .unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.client_id, "kotel");
        assert_eq!(config.shutdown_delay, Duration::from_secs(60));
        assert_eq!(config.gpio.pin, 17);
        assert!(config.gpio.active_low);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_backend_alias() {
        let config = load(&[("GPIOZERO_PIN_FACTORY", "mock")]).unwrap();
        assert_eq!(config.gpio.backend, ActuatorBackend::Mock);

        let config = load(&[("GPIOZERO_PIN_FACTORY", "mock"), ("GPIO_BACKEND", "sysfs")]).unwrap();
        assert_eq!(config.gpio.backend, ActuatorBackend::Sysfs);
    }

    #[rstest]
    #[case("pigpio")]
    #[case("rpigpio")]
    #[case("lgpio")]
    #[case("native")]
    fn test_pin_factory_maps_to_sysfs(#[case] factory: &str) {
        let config = load(&[("GPIOZERO_PIN_FACTORY", factory)]).unwrap();
        assert_eq!(config.gpio.backend, ActuatorBackend::Sysfs);
        assert_eq!(config.gpio.pin_factory.as_deref(), Some(factory));
    }

    #[test]
    fn test_backend_name_is_not_a_pin_factory() {
        let config = load(&[("GPIO_BACKEND", "sysfs")]).unwrap();
        assert!(config.gpio.pin_factory.is_none());
    }

    #[test]
    fn test_shutdown_delay_overflow_is_rejected() {
        let err = load(&[("AUTOMATIC_SHUTDOWN_DELAY", "307445734561825861")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "AUTOMATIC_SHUTDOWN_DELAY",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = load(&[("MQTT_PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("MQTT_PORT"));
    }

    #[test]
    fn test_invalid_flag() {
        assert!(load(&[("GPIO_ACTIVE_LOW", "maybe")]).is_err());
    }
}
