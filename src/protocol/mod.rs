//! The protocol module contains the wire-level pieces of the gateway: typed
//! messages and the frame codec that maps them onto Modbus-RTU frames.

pub mod frame;
pub mod message;

pub use frame::{crc16, decode, encode};
pub use message::{BindMode, ExceptionCode, MessageKind, ProtocolMessage};
