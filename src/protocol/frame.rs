//! # Frame Codec
//!
//! This module encodes [`ProtocolMessage`]s into Modbus-RTU frames and decodes
//! raw frames received from the RF bridge. It leverages the `nom` crate for
//! parsing frame bodies and the `crc` crate for the CRC-16/MODBUS frame check.
//!
//! ## Frame layout
//!
//! ```text
//! [slave address][function][body ...][crc lo][crc hi]
//! ```
//!
//! Decoding is context free: a request and its response share a function
//! code but never share a body length, so the kind is recovered from the
//! frame alone.
//!
//! ## Usage
//!
//! ```rust
//! use airios_rs::protocol::{decode, encode, ProtocolMessage};
//!
//! let request = ProtocolMessage::ReadRequest { address: 2, register: 0x0200, count: 1 };
//! let bytes = encode(&request).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), request);
//! ```

use crate::constants::{
    BIND_ANY_SERIAL, BIND_BODY_LEN, BIND_MODE_ACCESSORY, BIND_MODE_CONTROLLER, CRC_LEN, FC_BIND,
    FC_EXCEPTION_MASK, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, FRAME_MAX_LEN,
    FRAME_MIN_LEN, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::{DecodeError, EncodeError};
use crate::protocol::message::{BindMode, ExceptionCode, ProtocolMessage};
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use nom::multi::count;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes the Modbus CRC over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Serializes a message into a complete frame including the trailing CRC.
pub fn encode(message: &ProtocolMessage) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(FRAME_MAX_LEN);
    buf.put_u8(message.address());

    match message {
        ProtocolMessage::ReadRequest {
            register, count, ..
        } => {
            check_register_count(usize::from(*count), MAX_READ_REGISTERS)?;
            buf.put_u8(FC_READ_HOLDING_REGISTERS);
            buf.put_u16(*register);
            buf.put_u16(*count);
        }
        ProtocolMessage::ReadResponse { registers, .. } => {
            check_register_count(registers.len(), MAX_READ_REGISTERS)?;
            buf.put_u8(FC_READ_HOLDING_REGISTERS);
            buf.put_u8((registers.len() * 2) as u8);
            for value in registers {
                buf.put_u16(*value);
            }
        }
        ProtocolMessage::WriteRequest {
            register, values, ..
        } => {
            check_register_count(values.len(), MAX_WRITE_REGISTERS)?;
            buf.put_u8(FC_WRITE_MULTIPLE_REGISTERS);
            buf.put_u16(*register);
            buf.put_u16(values.len() as u16);
            buf.put_u8((values.len() * 2) as u8);
            for value in values {
                buf.put_u16(*value);
            }
        }
        ProtocolMessage::WriteAck {
            register, count, ..
        } => {
            check_register_count(usize::from(*count), MAX_WRITE_REGISTERS)?;
            buf.put_u8(FC_WRITE_MULTIPLE_REGISTERS);
            buf.put_u16(*register);
            buf.put_u16(*count);
        }
        ProtocolMessage::BindRequest {
            mode,
            node,
            product_id,
            rf_serial,
            ..
        } => {
            if *rf_serial == Some(BIND_ANY_SERIAL) {
                return Err(EncodeError::ReservedSerial(BIND_ANY_SERIAL));
            }
            buf.put_u8(FC_BIND);
            buf.put_u8(mode.mode_byte());
            buf.put_u8(mode.controller_byte());
            buf.put_u8(*node);
            buf.put_u32(*product_id);
            buf.put_u32(rf_serial.unwrap_or(BIND_ANY_SERIAL));
        }
        ProtocolMessage::Error { function, code, .. } => {
            if function & FC_EXCEPTION_MASK != 0 {
                return Err(EncodeError::InvalidFunction(*function));
            }
            let raw = code.to_u8();
            if ExceptionCode::from_u8(raw) != *code {
                return Err(EncodeError::NonCanonicalException(raw));
            }
            buf.put_u8(function | FC_EXCEPTION_MASK);
            buf.put_u8(raw);
        }
    }

    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    Ok(buf.freeze())
}

fn check_register_count(count: usize, max: usize) -> Result<(), EncodeError> {
    if count == 0 {
        return Err(EncodeError::EmptyPayload);
    }
    if count > max {
        return Err(EncodeError::TooManyRegisters(count));
    }
    Ok(())
}

/// Parses a complete frame into a message.
///
/// Validation order is length bounds, CRC, kind, body. A frame whose length
/// is plausible but whose CRC does not match is always reported as
/// [`DecodeError::ChecksumMismatch`], whatever byte was corrupted.
pub fn decode(frame: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    if frame.len() < FRAME_MIN_LEN || frame.len() > FRAME_MAX_LEN {
        return Err(DecodeError::Malformed(format!(
            "frame length {} outside {}..={}",
            frame.len(),
            FRAME_MIN_LEN,
            FRAME_MAX_LEN
        )));
    }

    let (content, trailer) = frame.split_at(frame.len() - CRC_LEN);
    let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
    let calculated = crc16(content);
    if expected != calculated {
        return Err(DecodeError::ChecksumMismatch {
            expected,
            calculated,
        });
    }

    let address = content[0];
    let function = content[1];
    let body = &content[2..];

    if function & FC_EXCEPTION_MASK != 0 {
        return match body {
            [code] => Ok(ProtocolMessage::Error {
                address,
                function: function & !FC_EXCEPTION_MASK,
                code: ExceptionCode::from_u8(*code),
            }),
            _ => Err(malformed_len("exception", body.len())),
        };
    }

    let message = match function {
        FC_READ_HOLDING_REGISTERS if body.len() == 4 => {
            let (register, count) = complete(parse_register_range(body))?;
            if count == 0 || usize::from(count) > MAX_READ_REGISTERS {
                return Err(DecodeError::Malformed(format!("read of {count} registers")));
            }
            ProtocolMessage::ReadRequest {
                address,
                register,
                count,
            }
        }
        FC_READ_HOLDING_REGISTERS => ProtocolMessage::ReadResponse {
            address,
            registers: complete(parse_read_response(body))?,
        },
        FC_WRITE_MULTIPLE_REGISTERS if body.len() == 4 => {
            let (register, count) = complete(parse_register_range(body))?;
            if count == 0 || usize::from(count) > MAX_WRITE_REGISTERS {
                return Err(DecodeError::Malformed(format!("ack of {count} registers")));
            }
            ProtocolMessage::WriteAck {
                address,
                register,
                count,
            }
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            let (register, values) = complete(parse_write_request(body))?;
            ProtocolMessage::WriteRequest {
                address,
                register,
                values,
            }
        }
        FC_BIND => {
            if body.len() != BIND_BODY_LEN {
                return Err(malformed_len("bind request", body.len()));
            }
            let (mode, node, product_id, rf_serial) = complete(parse_bind_request(body))?;
            ProtocolMessage::BindRequest {
                address,
                mode,
                node,
                product_id,
                rf_serial,
            }
        }
        other => return Err(DecodeError::UnknownKind(other)),
    };

    Ok(message)
}

fn malformed_len(what: &str, len: usize) -> DecodeError {
    DecodeError::Malformed(format!("{what} body of {len} bytes"))
}

/// Runs a body parser and requires it to consume the whole body.
fn complete<T>(result: IResult<&[u8], T>) -> Result<T, DecodeError> {
    match result {
        Ok(([], value)) => Ok(value),
        Ok((rest, _)) => Err(DecodeError::Malformed(format!(
            "{} trailing bytes",
            rest.len()
        ))),
        Err(err) => Err(DecodeError::Malformed(err.to_string())),
    }
}

fn parse_register_range(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, register) = be_u16(input)?;
    let (input, count) = be_u16(input)?;
    Ok((input, (register, count)))
}

fn parse_read_response(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    let (input, byte_count) = be_u8(input)?;
    let byte_count = usize::from(byte_count);
    if byte_count == 0
        || byte_count % 2 != 0
        || byte_count / 2 > MAX_READ_REGISTERS
        || byte_count != input.len()
    {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    count(be_u16, byte_count / 2)(input)
}

fn parse_write_request(input: &[u8]) -> IResult<&[u8], (u16, Vec<u16>)> {
    let (input, (register, quantity)) = parse_register_range(input)?;
    let (input, byte_count) = be_u8(input)?;
    let quantity = usize::from(quantity);
    if quantity == 0
        || quantity > MAX_WRITE_REGISTERS
        || usize::from(byte_count) != quantity * 2
        || input.len() != quantity * 2
    {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let (input, values) = count(be_u16, quantity)(input)?;
    Ok((input, (register, values)))
}

fn parse_bind_request(input: &[u8]) -> IResult<&[u8], (BindMode, u8, u32, Option<u32>)> {
    let (rest, mode_byte) = be_u8(input)?;
    let (rest, controller) = be_u8(rest)?;
    let mode = match (mode_byte, controller) {
        (BIND_MODE_CONTROLLER, 0) => BindMode::Controller,
        (BIND_MODE_ACCESSORY, controller) => BindMode::Accessory { controller },
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    let (rest, node) = be_u8(rest)?;
    let (rest, product_id) = be_u32(rest)?;
    let (rest, serial) = be_u32(rest)?;
    let rf_serial = (serial != BIND_ANY_SERIAL).then_some(serial);
    Ok((rest, (mode, node, product_id, rf_serial)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_reference_frames() {
        // Reference frames from the Modbus over serial line specification
        let frame = encode(&ProtocolMessage::ReadRequest {
            address: 0x01,
            register: 0x0000,
            count: 0x000A,
        })
        .unwrap();
        assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);

        let frame = encode(&ProtocolMessage::ReadRequest {
            address: 0x11,
            register: 0x006B,
            count: 0x0003,
        })
        .unwrap();
        assert_eq!(&frame[..], &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
    }

    #[test]
    fn test_request_and_response_share_function_code() {
        let request = encode(&ProtocolMessage::ReadRequest {
            address: 2,
            register: 0x0200,
            count: 2,
        })
        .unwrap();
        let response = encode(&ProtocolMessage::ReadResponse {
            address: 2,
            registers: vec![40, 35],
        })
        .unwrap();
        assert_eq!(request[1], response[1]);
        assert!(matches!(
            decode(&request),
            Ok(ProtocolMessage::ReadRequest { .. })
        ));
        assert!(matches!(
            decode(&response),
            Ok(ProtocolMessage::ReadResponse { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_empty_and_oversized() {
        let empty = ProtocolMessage::WriteRequest {
            address: 2,
            register: 0,
            values: vec![],
        };
        assert_eq!(encode(&empty), Err(EncodeError::EmptyPayload));

        let oversized = ProtocolMessage::ReadResponse {
            address: 2,
            registers: vec![0; 126],
        };
        assert_eq!(encode(&oversized), Err(EncodeError::TooManyRegisters(126)));
    }

    #[test]
    fn test_bind_any_serial_maps_to_none() {
        let message = ProtocolMessage::BindRequest {
            address: 207,
            mode: BindMode::Accessory { controller: 2 },
            node: 3,
            product_id: 0x0001_C83E,
            rf_serial: None,
        };
        let bytes = encode(&message).unwrap();
        assert_eq!(&bytes[9..13], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_controller_bind_with_controller_byte_is_malformed() {
        let mut content = vec![207, FC_BIND, BIND_MODE_CONTROLLER, 5, 2];
        content.extend_from_slice(&[0, 1, 0xC8, 0x92, 0xFF, 0xFF, 0xFF, 0xFF]);
        let crc = crc16(&content);
        content.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(decode(&content), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_read_response_parser_caps_register_count() {
        let mut body = vec![250u8];
        body.extend(std::iter::repeat(0u8).take(250));
        assert_eq!(parse_read_response(&body).map(|(_, r)| r.len()), Ok(125));

        let mut body = vec![252u8];
        body.extend(std::iter::repeat(0u8).take(252));
        assert!(parse_read_response(&body).is_err());
    }
}
