//! Typed protocol messages exchanged with the RF bridge.

use crate::constants::{
    BIND_MODE_ACCESSORY, BIND_MODE_CONTROLLER, FC_BIND, FC_READ_HOLDING_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of message that travel over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteAck,
    BindRequest,
    Error,
}

/// How a node is bound to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindMode {
    /// A ventilation unit (controller) bound directly to the bridge.
    Controller,
    /// An accessory bound to an already bound controller.
    Accessory { controller: u8 },
}

impl BindMode {
    pub(crate) fn mode_byte(&self) -> u8 {
        match self {
            BindMode::Controller => BIND_MODE_CONTROLLER,
            BindMode::Accessory { .. } => BIND_MODE_ACCESSORY,
        }
    }

    pub(crate) fn controller_byte(&self) -> u8 {
        match self {
            BindMode::Controller => 0,
            BindMode::Accessory { controller } => *controller,
        }
    }
}

/// Modbus exception codes returned by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    DeviceFailure,
    Acknowledge,
    DeviceBusy,
    Other(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::DeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::DeviceBusy,
            other => ExceptionCode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::DeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::DeviceBusy => 0x06,
            ExceptionCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value"),
            ExceptionCode::DeviceFailure => write!(f, "device failure"),
            ExceptionCode::Acknowledge => write!(f, "acknowledge"),
            ExceptionCode::DeviceBusy => write!(f, "device busy"),
            ExceptionCode::Other(code) => write!(f, "exception 0x{code:02X}"),
        }
    }
}

/// A decoded unit of wire communication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    ReadRequest {
        address: u8,
        register: u16,
        count: u16,
    },
    ReadResponse {
        address: u8,
        registers: Vec<u16>,
    },
    WriteRequest {
        address: u8,
        register: u16,
        values: Vec<u16>,
    },
    WriteAck {
        address: u8,
        register: u16,
        count: u16,
    },
    /// Sent to the bridge; the bridge acknowledges by echoing it.
    BindRequest {
        address: u8,
        mode: BindMode,
        node: u8,
        product_id: u32,
        /// `None` binds the first matching product that announces itself.
        rf_serial: Option<u32>,
    },
    Error {
        address: u8,
        function: u8,
        code: ExceptionCode,
    },
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::ReadRequest { .. } => MessageKind::ReadRequest,
            ProtocolMessage::ReadResponse { .. } => MessageKind::ReadResponse,
            ProtocolMessage::WriteRequest { .. } => MessageKind::WriteRequest,
            ProtocolMessage::WriteAck { .. } => MessageKind::WriteAck,
            ProtocolMessage::BindRequest { .. } => MessageKind::BindRequest,
            ProtocolMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Slave address the message is sent to or originates from.
    pub fn address(&self) -> u8 {
        match self {
            ProtocolMessage::ReadRequest { address, .. }
            | ProtocolMessage::ReadResponse { address, .. }
            | ProtocolMessage::WriteRequest { address, .. }
            | ProtocolMessage::WriteAck { address, .. }
            | ProtocolMessage::BindRequest { address, .. }
            | ProtocolMessage::Error { address, .. } => *address,
        }
    }

    pub fn function_code(&self) -> u8 {
        match self {
            ProtocolMessage::ReadRequest { .. } | ProtocolMessage::ReadResponse { .. } => {
                FC_READ_HOLDING_REGISTERS
            }
            ProtocolMessage::WriteRequest { .. } | ProtocolMessage::WriteAck { .. } => {
                FC_WRITE_MULTIPLE_REGISTERS
            }
            ProtocolMessage::BindRequest { .. } => FC_BIND,
            ProtocolMessage::Error { function, .. } => *function,
        }
    }

    /// The message kind a successful answer to this request has.
    pub fn expected_ack(&self) -> Option<MessageKind> {
        match self {
            ProtocolMessage::ReadRequest { .. } => Some(MessageKind::ReadResponse),
            ProtocolMessage::WriteRequest { .. } => Some(MessageKind::WriteAck),
            ProtocolMessage::BindRequest { .. } => Some(MessageKind::BindRequest),
            _ => None,
        }
    }

    /// Checks that `response` answers this request.
    ///
    /// An exception from the addressed slave for the same function always
    /// answers the request.
    pub fn check_response(&self, response: &ProtocolMessage) -> Result<(), String> {
        if response.address() != self.address() {
            return Err(format!(
                "response from address {} to request for address {}",
                response.address(),
                self.address()
            ));
        }
        if let ProtocolMessage::Error { function, .. } = response {
            return if *function == self.function_code() {
                Ok(())
            } else {
                Err(format!("exception for function 0x{function:02X}"))
            };
        }

        match (self, response) {
            (
                ProtocolMessage::ReadRequest { count, .. },
                ProtocolMessage::ReadResponse { registers, .. },
            ) if registers.len() == usize::from(*count) => Ok(()),
            (
                ProtocolMessage::WriteRequest {
                    register, values, ..
                },
                ProtocolMessage::WriteAck {
                    register: acked,
                    count,
                    ..
                },
            ) if register == acked && usize::from(*count) == values.len() => Ok(()),
            (ProtocolMessage::BindRequest { .. }, ProtocolMessage::BindRequest { .. })
                if self == response =>
            {
                Ok(())
            }
            _ => Err(format!(
                "{:?} does not answer {:?}",
                response.kind(),
                self.kind()
            )),
        }
    }
}
