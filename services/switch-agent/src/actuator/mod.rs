//! Actuator interface and backends.
//!
//! The actuator is the single on/off output this agent drives:
//! - `sysfs`: a Linux GPIO line through `/sys/class/gpio`
//! - `mock`: an in-memory switch for development and tests

mod mock;
mod sysfs;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub use mock::MockActuator;
pub use sysfs::SysfsGpio;

/// Logical output state of the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActuatorState {
    On,
    #[default]
    Off,
}

impl ActuatorState {
    /// Payload published on the state topic.
    pub fn as_payload(&self) -> &'static str {
        match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
        }
    }

    pub fn is_on(&self) -> bool {
        *self == ActuatorState::On
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

/// Errors raised by actuator drivers.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Reading or writing a driver file failed.
    #[error("gpio io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The driver reported a value that is neither on nor off.
    #[error("unexpected gpio value {0:?}")]
    InvalidValue(String),

    /// The driver refused the operation.
    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

/// A single on/off output.
///
/// Calls are expected to be fast; they run on the controller task and are
/// never issued concurrently.
pub trait Actuator: Send + 'static {
    /// Driver name for logging.
    fn name(&self) -> &str;

    /// Drive the output on.
    fn turn_on(&mut self) -> Result<(), ActuatorError>;

    /// Drive the output off.
    fn turn_off(&mut self) -> Result<(), ActuatorError>;

    /// Read the current output state.
    fn read_state(&self) -> Result<ActuatorState, ActuatorError>;
}

/// gpiozero pin factory names. All of them drive the same kernel lines the
/// sysfs driver uses.
const PIN_FACTORY_ALIASES: &[&str] = &["rpigpio", "pigpio", "lgpio", "native"];

/// Which driver backs the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorBackend {
    Sysfs,
    Mock,
}

impl ActuatorBackend {
    /// Whether `name` is a gpiozero pin factory rather than a backend name.
    pub fn is_pin_factory_alias(name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        PIN_FACTORY_ALIASES.contains(&name.as_str())
    }
}

impl FromStr for ActuatorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(ActuatorBackend::Sysfs),
            "mock" => Ok(ActuatorBackend::Mock),
            alias if PIN_FACTORY_ALIASES.contains(&alias) => Ok(ActuatorBackend::Sysfs),
            other => Err(format!(
                "unknown gpio backend {other:?} (expected \"sysfs\" or \"mock\")"
            )),
        }
    }
}

impl fmt::Display for ActuatorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorBackend::Sysfs => f.write_str("sysfs"),
            ActuatorBackend::Mock => f.write_str("mock"),
        }
    }
}

/// GPIO settings for the actuator.
#[derive(Debug, Clone)]
pub struct GpioConfig {
    /// Driver backend.
    pub backend: ActuatorBackend,

    /// GPIO line number.
    pub pin: u32,

    /// Invert the electrical level.
    pub active_low: bool,

    /// Root of the sysfs GPIO tree.
    pub sysfs_root: PathBuf,

    /// gpiozero pin factory name the backend was mapped from, if any.
    pub pin_factory: Option<String>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: ActuatorBackend::Sysfs,
            pin: 21,
            active_low: false,
            sysfs_root: PathBuf::from(sysfs::DEFAULT_SYSFS_ROOT),
            pin_factory: None,
        }
    }
}

/// Open the actuator selected by `config`.
pub fn open(config: &GpioConfig) -> Result<Box<dyn Actuator>, ActuatorError> {
    match config.backend {
        ActuatorBackend::Sysfs => Ok(Box::new(SysfsGpio::open(
            &config.sysfs_root,
            config.pin,
            config.active_low,
        )?)),
        ActuatorBackend::Mock => Ok(Box::new(MockActuator::new())),
    }
}
