//! Protocol Constants
//!
//! This module defines the function codes, register map and product
//! identifiers used on the Modbus-RTU link to the Airios RF bridge.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Frame layout
// ----------------------------------------------------------------------------

/// Smallest possible frame: address, function, CRC.
pub const FRAME_MIN_LEN: usize = 4;

/// Modbus RTU ADU maximum.
pub const FRAME_MAX_LEN: usize = 256;

/// Length of the trailing CRC.
pub const CRC_LEN: usize = 2;

/// Maximum registers in one read request.
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum registers in one write request.
pub const MAX_WRITE_REGISTERS: usize = 123;

// Function codes
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// User-defined function code for RF bind requests.
pub const FC_BIND: u8 = 0x41;
pub const FC_EXCEPTION_MASK: u8 = 0x80;

pub const BIND_MODE_CONTROLLER: u8 = 0x01;
pub const BIND_MODE_ACCESSORY: u8 = 0x02;
pub const BIND_ANY_SERIAL: u32 = 0xFFFF_FFFF;

/// Length of a bind request body.
pub const BIND_BODY_LEN: usize = 11;

// ----------------------------------------------------------------------------
// Addressing
// ----------------------------------------------------------------------------

/// Default Modbus address of the serial RF bridge.
pub const DEFAULT_BRIDGE_ADDRESS: u8 = 207;

/// Highest valid Modbus slave address.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

// ----------------------------------------------------------------------------
// Register map: node information (all nodes)
// ----------------------------------------------------------------------------

pub const REG_PRODUCT_ID: u16 = 0x0000;
pub const REG_RF_ADDRESS: u16 = 0x0002;
pub const REG_SOFTWARE_VERSION: u16 = 0x0004;
pub const REG_FAULT_STATUS: u16 = 0x0005;
pub const REG_RF_COMM_STATUS: u16 = 0x0006;
pub const REG_BATTERY_LOW: u16 = 0x0007;

// Bridge
pub const REG_RF_LOAD_CURRENT_HOUR: u16 = 0x0100;
pub const REG_RF_LOAD_LAST_HOUR: u16 = 0x0101;
pub const REG_MESSAGES_SENT_CURRENT_HOUR: u16 = 0x0102;
pub const REG_MESSAGES_SENT_LAST_HOUR: u16 = 0x0103;
pub const REG_UPTIME: u16 = 0x0104;
pub const REG_BINDING_STATUS: u16 = 0x0106;
/// Write-only: reset mode.
pub const REG_RESET_COMMAND: u16 = 0x0180;
/// Write-only: Modbus address of the node to unbind.
pub const REG_UNBIND_COMMAND: u16 = 0x0181;

// Ventilation unit: measurements
pub const REG_SUPPLY_FAN_SPEED: u16 = 0x0200;
pub const REG_EXHAUST_FAN_SPEED: u16 = 0x0201;
pub const REG_SUPPLY_FAN_RPM: u16 = 0x0202;
pub const REG_EXHAUST_FAN_RPM: u16 = 0x0203;
pub const REG_TEMPERATURE_INLET: u16 = 0x0204;
pub const REG_TEMPERATURE_OUTLET: u16 = 0x0205;
pub const REG_TEMPERATURE_EXHAUST: u16 = 0x0206;
pub const REG_TEMPERATURE_SUPPLY: u16 = 0x0207;
pub const REG_BYPASS_POSITION: u16 = 0x0208;
pub const REG_BYPASS_MODE: u16 = 0x0209;
pub const REG_CURRENT_VENTILATION_SPEED: u16 = 0x020A;
pub const REG_REQUESTED_VENTILATION_SPEED: u16 = 0x020B;
pub const REG_OVERRIDE_REMAINING_TIME: u16 = 0x020C;
pub const REG_FILTER_DIRTY: u16 = 0x020D;
pub const REG_FILTER_REMAINING: u16 = 0x020E;
pub const REG_FILTER_DURATION: u16 = 0x020F;
pub const REG_ERROR_CODE: u16 = 0x0210;
pub const REG_DEFROST: u16 = 0x0211;
pub const REG_POSTHEATER: u16 = 0x0212;
pub const REG_CO2_LEVEL: u16 = 0x0213;
pub const REG_UNIT_FEATURES: u16 = 0x0214;

// Ventilation unit: settings
pub const REG_PREHEATER_SETPOINT: u16 = 0x0220;
pub const REG_FROST_PROTECTION_SETPOINT: u16 = 0x0221;
pub const REG_FREE_VENTILATION_SETPOINT: u16 = 0x0222;
pub const REG_FREE_VENTILATION_COOLING_OFFSET: u16 = 0x0223;
pub const REG_CO2_CONTROL_SETPOINT: u16 = 0x0224;
pub const REG_BASIC_VENTILATION_ENABLE: u16 = 0x0225;

/// Preset fan speeds, supply/exhaust pairs for away, low, medium, high.
pub const REG_PRESET_AWAY_SUPPLY: u16 = 0x0230;
pub const REG_PRESET_AWAY_EXHAUST: u16 = 0x0231;
pub const REG_PRESET_LOW_SUPPLY: u16 = 0x0232;
pub const REG_PRESET_LOW_EXHAUST: u16 = 0x0233;
pub const REG_PRESET_MEDIUM_SUPPLY: u16 = 0x0234;
pub const REG_PRESET_MEDIUM_EXHAUST: u16 = 0x0235;
pub const REG_PRESET_HIGH_SUPPLY: u16 = 0x0236;
pub const REG_PRESET_HIGH_EXHAUST: u16 = 0x0237;

/// Write-only: temporary override durations in minutes.
pub const REG_OVERRIDE_TIME_LOW: u16 = 0x0240;
pub const REG_OVERRIDE_TIME_MEDIUM: u16 = 0x0241;
pub const REG_OVERRIDE_TIME_HIGH: u16 = 0x0242;

/// Write-only: any write resets the filter counter.
pub const REG_FILTER_RESET: u16 = 0x0250;

// Raw "value not available" sentinels
pub const SENTINEL_U16: u16 = 0xFFFF;
pub const SENTINEL_I16: u16 = 0x8000;
pub const SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// Longest accepted temporary override.
pub const MAX_OVERRIDE_MINUTES: u16 = 24 * 60;

// ----------------------------------------------------------------------------
// Products
// ----------------------------------------------------------------------------

pub const PRODUCT_ID_BRDG_02R13: u32 = 0x0001_C849;
pub const PRODUCT_ID_VMD_02RPS78: u32 = 0x0001_C892;
pub const PRODUCT_ID_VMD_07RPS13: u32 = 0x0001_C88E;
pub const PRODUCT_ID_VMN_05LM02: u32 = 0x0001_C83E;
pub const PRODUCT_ID_VMN_02LM11: u32 = 0x0001_C852;

// ----------------------------------------------------------------------------
// Timing defaults
// ----------------------------------------------------------------------------

pub const DEFAULT_BAUD_RATE: u32 = 19200;
pub const DEFAULT_FRAME_GAP: Duration = Duration::from_millis(20);
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Lower bound on the poll period, protects RF airtime and bridge load.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;
pub const MAX_STALE_MULTIPLIER: u32 = 100;
/// Upper bound on any single wait taken from configuration.
pub const MAX_CONFIG_TIMEOUT: Duration = Duration::from_secs(3600);
pub const MAX_FRAME_GAP: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_MULTIPLIER: u32 = 3;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_READ_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_COMMAND_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);
pub const DEFAULT_BIND_STATUS_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(60);
