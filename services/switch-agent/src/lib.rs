//! MQTT switch agent library.
//!
//! The switch agent bridges an MQTT broker to a single on/off actuator (a
//! relay on a GPIO line). Commands on the command topic switch the actuator,
//! the resulting state is published retained, and an idle watchdog forces
//! the actuator off when commands stop arriving.
//!
//! ## Architecture
//!
//! ```text
//! RunningAgent
//! ├── SwitchController   (actor: actuator + session + last activity)
//! ├── watchdog timer     (PeriodicTask -> WatchdogTick)
//! └── heartbeat timer    (PeriodicTask -> HeartbeatTick)
//! ```
//!
//! The transport feeds connection events into the same mailbox, so the
//! controller serializes everything that reads or changes the actuator.
//!
//! ## Modules
//!
//! - `actors`: actor framework and the switch controller
//! - `actuator`: actuator interface, sysfs GPIO and mock backends
//! - `transport`: bus transport interface, MQTT and mock implementations
//! - `scheduler`: cancellable periodic and delayed tasks
//! - `health`: HTTP health endpoint

pub mod actors;
pub mod actuator;
pub mod agent;
pub mod config;
pub mod health;
pub mod heartbeat;
pub mod logging;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod transport;
pub mod watchdog;

// Re-export commonly used types
pub use actuator::{ActuatorState, MockActuator};
pub use agent::{AgentSettings, RunningAgent};
pub use config::Config;
pub use session::{SessionManager, SessionState};
pub use transport::{MockTransport, MqttTransport};
