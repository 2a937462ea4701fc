//! Linux sysfs GPIO driver.
//!
//! Uses the legacy `/sys/class/gpio` interface: the line is exported if
//! needed, configured as an output, and driven through its `value` file.
//! Active-low inversion is delegated to the kernel's `active_low`
//! attribute, so `value` always holds the logical state.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{Actuator, ActuatorError, ActuatorState};

pub(super) const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// How long to wait for udev to create the line directory after export.
const EXPORT_POLL_ATTEMPTS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A GPIO line driven through sysfs.
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    line_dir: PathBuf,
}

impl SysfsGpio {
    /// Export (if needed) and configure `pin` as an output under `root`.
    pub fn open(root: &Path, pin: u32, active_low: bool) -> Result<Self, ActuatorError> {
        let line_dir = root.join(format!("gpio{pin}"));

        if !line_dir.exists() {
            info!(pin, root = %root.display(), "Exporting GPIO line");
            write_attr(&root.join("export"), &pin.to_string())?;
            wait_for_line(&line_dir);
        }

        let gpio = Self { pin, line_dir };
        write_attr(&gpio.attr("active_low"), if active_low { "1" } else { "0" })?;

        // "high" and "low" set the raw level regardless of active_low; pick
        // the one that leaves the output logically off.
        let direction = if active_low { "high" } else { "low" };
        write_attr(&gpio.attr("direction"), direction)?;

        info!(pin, active_low, direction, "GPIO line configured as output");
        Ok(gpio)
    }

    /// GPIO line number.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.line_dir.join(name)
    }

    fn write_value(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let value = if state.is_on() { "1" } else { "0" };
        debug!(pin = self.pin, value, "Writing GPIO value");
        write_attr(&self.attr("value"), value)
    }
}

impl Actuator for SysfsGpio {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn turn_on(&mut self) -> Result<(), ActuatorError> {
        self.write_value(ActuatorState::On)
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.write_value(ActuatorState::Off)
    }

    fn read_state(&self) -> Result<ActuatorState, ActuatorError> {
        let path = self.attr("value");
        let raw = fs::read_to_string(&path).map_err(|source| ActuatorError::Io { path, source })?;
        match raw.trim() {
            "1" => Ok(ActuatorState::On),
            "0" => Ok(ActuatorState::Off),
            other => Err(ActuatorError::InvalidValue(other.to_string())),
        }
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), ActuatorError> {
    fs::write(path, value).map_err(|source| ActuatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn wait_for_line(line_dir: &Path) {
    for _ in 0..EXPORT_POLL_ATTEMPTS {
        if line_dir.exists() {
            return;
        }
        thread::sleep(EXPORT_POLL_INTERVAL);
    }
}
