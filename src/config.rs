//! # Gateway Configuration
//!
//! Configuration is read once at startup from a JSON file. Every field has a
//! default, so an empty object `{}` plus a serial port path is a complete
//! configuration:
//!
//! ```json
//! {
//!   "serial": { "port": "/dev/ttyUSB0" },
//!   "devices": [ { "address": 2, "kind": "ventilation_unit", "name": "attic" } ]
//! }
//! ```

use crate::constants::*;
use crate::device::{Device, DeviceKind, Parameter};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    /// Single letter used in "8E1" style notation.
    pub fn code(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// RS485 link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: u8,
    pub data_bits: u8,
    /// Line silence that terminates a response frame.
    pub frame_gap_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Even,
            stop_bits: 1,
            data_bits: 8,
            frame_gap_ms: DEFAULT_FRAME_GAP.as_millis() as u64,
        }
    }
}

impl SerialSettings {
    pub fn frame_gap(&self) -> Duration {
        Duration::from_millis(self.frame_gap_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    /// Readings older than interval × multiplier are stale.
    pub stale_multiplier: u32,
    pub read_timeout_ms: u64,
    /// Attempts per read before the device is skipped for the cycle.
    pub attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            stale_multiplier: DEFAULT_STALE_MULTIPLIER,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            attempts: DEFAULT_READ_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl PollSettings {
    /// Poll period with the minimum enforced.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn max_age(&self) -> Duration {
        self.interval().saturating_mul(self.stale_multiplier)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub ack_timeout_ms: u64,
    /// Retries after the first send.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            max_retries: DEFAULT_COMMAND_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
        }
    }
}

impl CommandSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindSettings {
    pub status_poll_ms: u64,
    pub timeout_secs: u64,
}

impl Default for BindSettings {
    fn default() -> Self {
        Self {
            status_poll_ms: DEFAULT_BIND_STATUS_POLL.as_millis() as u64,
            timeout_secs: DEFAULT_BIND_TIMEOUT.as_secs(),
        }
    }
}

impl BindSettings {
    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A device known to be bound before startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: u8,
    pub kind: DeviceKind,
    #[serde(default)]
    pub product_id: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    /// Narrows the parameters polled; defaults to everything the kind has.
    #[serde(default)]
    pub capabilities: Option<Vec<Parameter>>,
}

impl DeviceEntry {
    pub fn to_device(&self) -> Device {
        let mut device = Device::new(self.address, self.kind);
        if let Some(capabilities) = &self.capabilities {
            device = device.with_capabilities(capabilities.iter().copied());
        }
        if let Some(name) = &self.name {
            device = device.with_name(name.clone());
        }
        if let Some(product_id) = self.product_id {
            device = device.with_product_id(product_id);
        }
        device
    }
}

fn default_bridge_address() -> u8 {
    DEFAULT_BRIDGE_ADDRESS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default = "default_bridge_address")]
    pub bridge_address: u8,
    /// Startup fails when the bridge reports another RF address.
    #[serde(default)]
    pub expected_bridge_rf_address: Option<u32>,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub bind: BindSettings,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            bridge_address: DEFAULT_BRIDGE_ADDRESS,
            expected_bridge_rf_address: None,
            poll: PollSettings::default(),
            command: CommandSettings::default(),
            bind: BindSettings::default(),
            devices: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Loads, normalizes and validates a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = serde_json::from_str(text)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Applies the enforced minimums.
    pub fn normalize(&mut self) {
        if self.poll.interval_secs < MIN_POLL_INTERVAL_SECS {
            log::warn!(
                "Poll interval of {}s is below the minimum, using {MIN_POLL_INTERVAL_SECS}s",
                self.poll.interval_secs
            );
            self.poll.interval_secs = MIN_POLL_INTERVAL_SECS;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !is_slave_address(self.bridge_address) {
            return invalid(format!("bridge address {} out of range", self.bridge_address));
        }
        let mut seen = vec![self.bridge_address];
        for entry in &self.devices {
            if !is_slave_address(entry.address) {
                return invalid(format!("device address {} out of range", entry.address));
            }
            if entry.kind == DeviceKind::Bridge {
                return invalid(format!(
                    "device {} cannot be a bridge, use bridge_address",
                    entry.address
                ));
            }
            if seen.contains(&entry.address) {
                return invalid(format!("device address {} used twice", entry.address));
            }
            seen.push(entry.address);
        }
        if self.poll.attempts == 0 {
            return invalid("poll.attempts must be at least 1".to_string());
        }
        if self.poll.stale_multiplier == 0 || self.poll.stale_multiplier > MAX_STALE_MULTIPLIER {
            return invalid(format!(
                "poll.stale_multiplier must be within 1..={MAX_STALE_MULTIPLIER}"
            ));
        }
        if self.poll.interval_secs > MAX_POLL_INTERVAL_SECS {
            return invalid(format!(
                "poll.interval_secs must be at most {MAX_POLL_INTERVAL_SECS}"
            ));
        }
        let waits = [
            ("poll.read_timeout_ms", self.poll.read_timeout()),
            ("poll.retry_delay_ms", self.poll.retry_delay()),
            ("command.ack_timeout_ms", self.command.ack_timeout()),
            (
                "command.initial_backoff_ms",
                Duration::from_millis(self.command.initial_backoff_ms),
            ),
            (
                "command.max_backoff_ms",
                Duration::from_millis(self.command.max_backoff_ms),
            ),
            ("bind.status_poll_ms", self.bind.status_poll()),
            ("bind.timeout_secs", self.bind.timeout()),
        ];
        for (name, wait) in waits {
            if wait > MAX_CONFIG_TIMEOUT {
                return invalid(format!(
                    "{name} exceeds {}s",
                    MAX_CONFIG_TIMEOUT.as_secs()
                ));
            }
        }
        if !(self.command.backoff_multiplier >= 1.0) {
            return invalid("command.backoff_multiplier must be at least 1".to_string());
        }
        if self.serial.frame_gap_ms == 0 || self.serial.frame_gap() > MAX_FRAME_GAP {
            return invalid(format!(
                "serial.frame_gap_ms must be within 1..={}",
                MAX_FRAME_GAP.as_millis()
            ));
        }
        Ok(())
    }
}

fn is_slave_address(address: u8) -> bool {
    (1..=MAX_SLAVE_ADDRESS).contains(&address)
}
