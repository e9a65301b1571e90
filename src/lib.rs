//! # airios-rs - A Rust Crate for Airios RF Bridge Ventilation Gateways
//!
//! The airios-rs crate talks to residential ventilation hardware on an RF
//! network (Ramses II) through an Airios RS485 bridge that exposes every
//! bound node as a Modbus-RTU slave.
//!
//! ## Features
//!
//! - Modbus-RTU frame codec with CRC-16 validation and typed protocol messages
//! - Half-duplex transport that keeps exactly one request on the bus
//! - Device registry with typed parameter catalogues per device kind
//! - State cache with staleness tracking and change notifications
//! - Periodic polling that tolerates unreachable devices
//! - Command dispatch with exponential backoff and optimistic state updates
//! - Bridge identification, binding and unbinding of nodes
//! - A hardware-free bridge simulator for tests
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! airios-rs = "0.1.0"
//! ```
//!
//! ```rust,no_run
//! use airios_rs::{connect, Command, CommandRequest, GatewayConfig, Preset};
//!
//! # async fn example() -> Result<(), airios_rs::GatewayError> {
//! let config = GatewayConfig::from_file("airios.json")?;
//! let gateway = connect(config).await?;
//!
//! gateway.poll_once().await;
//! gateway
//!     .submit(CommandRequest::new(
//!         2,
//!         Command::SetPresetFanSpeed {
//!             preset: Preset::Low,
//!             supply: 40,
//!             exhaust: 35,
//!         },
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod poll;
pub mod protocol;
pub mod state;
pub mod util;

pub use crate::error::{
    CommandFailed, ConfigError, DecodeError, EncodeError, GatewayError, RegistryError,
    TransportError,
};
pub use crate::logging::{init_logger, log_info};

pub use bus::{Bus, MockSerialPort, SerialPort, SimulatedBridge, Transport};
pub use command::{Command, CommandDispatcher, CommandOutcome, CommandRequest, PendingCommand};
pub use config::GatewayConfig;
pub use device::{
    BindingStatus, BypassMode, Device, DeviceKind, DeviceRegistry, Parameter, Preset, ResetMode,
    UnitFeatures, Value, VentilationSpeed,
};
pub use gateway::{Gateway, Snapshot};
pub use poll::{CycleReport, PollScheduler};
pub use protocol::{BindMode, ExceptionCode, MessageKind, ProtocolMessage};
pub use state::{ReadResult, Reading, StateCache, StateChange};

use std::sync::Arc;

/// Opens the configured serial port and starts a gateway on it.
///
/// # Arguments
/// * `config` - Gateway configuration; `config.serial.port` names the device
///   (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
///
/// # Returns
/// * `Ok(Gateway)` - Bridge identified, configured devices registered
/// * `Err(GatewayError)` - Port could not be opened or the bridge was refused
pub async fn connect(config: GatewayConfig) -> Result<Gateway, GatewayError> {
    config.validate()?;
    let port = bus::serial::open(&config.serial)?;
    let transport = Transport::new(port, config.serial.frame_gap());
    Gateway::start(Arc::new(transport), config).await
}
