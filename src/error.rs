//! # Gateway Error Handling
//!
//! This module defines the error taxonomy of the airios-rs crate. Each layer
//! has its own error type so that failures stay attributable to the layer
//! that produced them:
//!
//! - [`DecodeError`] / [`EncodeError`] - frame codec, always recoverable.
//! - [`TransportError`] - serial link, recoverable through caller-driven retry.
//! - [`RegistryError`] - device registry, surfaced immediately.
//! - [`CommandFailed`] - terminal outcome of a submitted command.
//!
//! [`GatewayError`] wraps all of them for the façade and the CLI.

use crate::device::Parameter;
use crate::protocol::ExceptionCode;
use thiserror::Error;

/// Errors produced while decoding a raw frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame length out of bounds or body inconsistent with its length fields.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The CRC carried by the frame does not match the computed one.
    #[error("Checksum mismatch: expected 0x{expected:04X}, calculated 0x{calculated:04X}")]
    ChecksumMismatch { expected: u16, calculated: u16 },

    /// Function code that does not map onto any message kind.
    #[error("Unknown message kind: 0x{0:02X}")]
    UnknownKind(u8),
}

/// Errors produced when a message cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Message carries no registers")]
    EmptyPayload,

    #[error("Too many registers for one frame: {0}")]
    TooManyRegisters(usize),

    /// 0xFFFFFFFF is the wire marker for "any serial".
    #[error("RF serial 0x{0:08X} is reserved")]
    ReservedSerial(u32),

    /// `Other` holding a code that has a named variant.
    #[error("Exception code 0x{0:02X} must use its named variant")]
    NonCanonicalException(u8),

    #[error("Function code 0x{0:02X} collides with the exception flag")]
    InvalidFunction(u8),
}

/// Errors produced by a single request/response exchange on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response arrived within the request timeout.
    #[error("Timed out waiting for response")]
    Timeout,

    /// The response could not be decoded, even after one re-read.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A well-formed frame that does not answer the request.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The serial port itself failed.
    #[error("Serial port error: {0}")]
    Io(String),

    /// The request could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl TransportError {
    /// Whether a caller-driven retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout
                | TransportError::Framing(_)
                | TransportError::UnexpectedResponse(_)
        )
    }
}

/// Errors produced by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Device address {0} is already registered")]
    DuplicateAddress(u8),

    #[error("No device registered at address {0}")]
    NotFound(u8),

    #[error("Device {address} does not support parameter {parameter}")]
    UnsupportedParameter { address: u8, parameter: Parameter },
}

/// Terminal failure of a submitted command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandFailed {
    /// No acknowledgement after the full retry budget.
    #[error("Command timed out after all retries")]
    Timeout,

    /// Only corrupted responses after the full retry budget.
    #[error("Command failed with framing errors after all retries")]
    Framing,

    /// The device answered with an explicit exception.
    #[error("Command rejected by device: {0}")]
    Rejected(ExceptionCode),

    /// The requested value lies outside the parameter's validity domain.
    #[error("Value {value} out of range for {parameter}")]
    OutOfRange { parameter: Parameter, value: f64 },

    /// The target cannot execute this command.
    #[error("Command not supported by device {address}: {reason}")]
    Unsupported { address: u8, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Cancelled cooperatively before completion.
    #[error("Command cancelled")]
    Cancelled,

    /// The serial port failed in a way retries cannot fix.
    #[error("Serial port error: {0}")]
    Io(String),

    /// The command's frame cannot be represented on the wire.
    #[error("Command cannot be encoded: {0}")]
    Encode(#[from] EncodeError),
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for the gateway façade.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Command(#[from] CommandFailed),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The device on the bus is not the expected bridge.
    #[error("Unexpected bridge: {0}")]
    UnexpectedBridge(String),

    /// The bridge answered a read with something unusable.
    #[error("Device {address} returned no usable value for {parameter}")]
    MissingValue { address: u8, parameter: Parameter },

    /// Binding did not reach the expected completion state.
    #[error("Binding failed: {0}")]
    BindFailed(String),
}
