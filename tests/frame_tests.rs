//! Tests for the frame codec: golden frames, decode failures and the
//! round-trip and corruption laws.

use airios_rs::protocol::{crc16, decode, encode, BindMode, ExceptionCode, ProtocolMessage};
use airios_rs::util::hex::decode_hex;
use airios_rs::{DecodeError, EncodeError};
use proptest::prelude::*;

/// Tests a read request against a well known Modbus frame.
#[test]
fn test_encode_read_request_golden() {
    let message = ProtocolMessage::ReadRequest {
        address: 0x01,
        register: 0x0000,
        count: 1,
    };
    let frame = encode(&message).unwrap();
    assert_eq!(frame.as_ref(), decode_hex("01 03 00 00 00 01 84 0A").unwrap());
    assert_eq!(decode(&frame).unwrap(), message);
}

#[test]
fn test_crc_is_appended_little_endian() {
    let frame = encode(&ProtocolMessage::WriteAck {
        address: 207,
        register: 0x0232,
        count: 2,
    })
    .unwrap();
    let (content, trailer) = frame.split_at(frame.len() - 2);
    assert_eq!(u16::from_le_bytes([trailer[0], trailer[1]]), crc16(content));
}

#[test]
fn test_decode_read_response() {
    let mut frame = vec![0x02, 0x03, 0x04, 0x00, 0x28, 0x00, 0x23];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    assert_eq!(
        decode(&frame).unwrap(),
        ProtocolMessage::ReadResponse {
            address: 2,
            registers: vec![40, 35],
        }
    );
}

#[test]
fn test_decode_exception() {
    let mut frame = vec![0x02, 0x90, 0x06];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    assert_eq!(
        decode(&frame).unwrap(),
        ProtocolMessage::Error {
            address: 2,
            function: 0x10,
            code: ExceptionCode::DeviceBusy,
        }
    );
}

#[test]
fn test_bind_request_layout() {
    let frame = encode(&ProtocolMessage::BindRequest {
        address: 207,
        mode: BindMode::Accessory { controller: 2 },
        node: 5,
        product_id: 0x0001_C892,
        rf_serial: None,
    })
    .unwrap();
    assert_eq!(
        &frame[..frame.len() - 2],
        &[0xCF, 0x41, 0x02, 0x02, 0x05, 0x00, 0x01, 0xC8, 0x92, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn test_decode_too_short() {
    assert!(matches!(decode(&[0x01, 0x03, 0x00]), Err(DecodeError::Malformed(_))));
}

#[test]
fn test_decode_too_long() {
    let frame = vec![0u8; 257];
    assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
}

#[test]
fn test_decode_unknown_kind() {
    let mut frame = vec![0x01, 0x2B, 0x00];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    assert_eq!(decode(&frame), Err(DecodeError::UnknownKind(0x2B)));
}

#[test]
fn test_decode_length_mismatch() {
    // Byte count claims three registers, two follow.
    let mut frame = vec![0x02, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    assert!(matches!(decode(&frame), Err(DecodeError::Malformed(_))));
}

#[test]
fn test_encode_refuses_unrepresentable() {
    let empty = ProtocolMessage::WriteRequest {
        address: 2,
        register: 0x0200,
        values: vec![],
    };
    assert_eq!(encode(&empty), Err(EncodeError::EmptyPayload));

    let huge = ProtocolMessage::ReadResponse {
        address: 2,
        registers: vec![0; 126],
    };
    assert_eq!(encode(&huge), Err(EncodeError::TooManyRegisters(126)));
}

#[test]
fn test_encode_refuses_reserved_serial() {
    let bind = ProtocolMessage::BindRequest {
        address: 207,
        mode: BindMode::Controller,
        node: 2,
        product_id: 0x0001_C83A,
        rf_serial: Some(0xFFFF_FFFF),
    };
    assert_eq!(encode(&bind), Err(EncodeError::ReservedSerial(0xFFFF_FFFF)));
}

#[test]
fn test_encode_refuses_ambiguous_exceptions() {
    let aliased = ProtocolMessage::Error {
        address: 2,
        function: 0x10,
        code: ExceptionCode::Other(3),
    };
    assert_eq!(encode(&aliased), Err(EncodeError::NonCanonicalException(3)));

    let flagged = ProtocolMessage::Error {
        address: 2,
        function: 0x83,
        code: ExceptionCode::IllegalDataValue,
    };
    assert_eq!(encode(&flagged), Err(EncodeError::InvalidFunction(0x83)));

    // Codes without a named variant still travel as `Other`.
    let vendor = ProtocolMessage::Error {
        address: 2,
        function: 0x03,
        code: ExceptionCode::Other(0x0B),
    };
    assert_eq!(decode(&encode(&vendor).unwrap()).unwrap(), vendor);
}

fn exception_code() -> impl Strategy<Value = ExceptionCode> {
    prop_oneof![
        Just(ExceptionCode::IllegalFunction),
        Just(ExceptionCode::IllegalDataAddress),
        Just(ExceptionCode::IllegalDataValue),
        Just(ExceptionCode::DeviceFailure),
        Just(ExceptionCode::Acknowledge),
        Just(ExceptionCode::DeviceBusy),
        any::<u8>().prop_map(ExceptionCode::Other),
    ]
}

fn message() -> impl Strategy<Value = ProtocolMessage> {
    let address = 1u8..=247;
    prop_oneof![
        (address.clone(), any::<u16>(), 1u16..=125).prop_map(|(address, register, count)| {
            ProtocolMessage::ReadRequest {
                address,
                register,
                count,
            }
        }),
        (address.clone(), prop::collection::vec(any::<u16>(), 1..=125))
            .prop_map(|(address, registers)| ProtocolMessage::ReadResponse { address, registers }),
        (
            address.clone(),
            any::<u16>(),
            prop::collection::vec(any::<u16>(), 1..=123)
        )
            .prop_map(|(address, register, values)| ProtocolMessage::WriteRequest {
                address,
                register,
                values,
            }),
        (address.clone(), any::<u16>(), 1u16..=123).prop_map(|(address, register, count)| {
            ProtocolMessage::WriteAck {
                address,
                register,
                count,
            }
        }),
        (
            address.clone(),
            prop_oneof![
                Just(BindMode::Controller),
                (1u8..=247).prop_map(|controller| BindMode::Accessory { controller }),
            ],
            any::<u8>(),
            any::<u32>(),
            prop::option::of(any::<u32>()),
        )
            .prop_map(|(address, mode, node, product_id, rf_serial)| {
                ProtocolMessage::BindRequest {
                    address,
                    mode,
                    node,
                    product_id,
                    rf_serial,
                }
            }),
        (address, any::<u8>(), exception_code())
            .prop_map(|(address, function, code)| ProtocolMessage::Error {
                address,
                function,
                code,
            }),
    ]
}

proptest! {
    /// Whatever `encode` accepts decodes back unchanged.
    #[test]
    fn prop_round_trip(message in message()) {
        match encode(&message) {
            Ok(frame) => prop_assert_eq!(decode(&frame).unwrap(), message),
            Err(err) => {
                let refused = matches!(
                    err,
                    EncodeError::ReservedSerial(_)
                        | EncodeError::NonCanonicalException(_)
                        | EncodeError::InvalidFunction(_)
                );
                prop_assert!(refused, "{:?} refused with {}", message, err);
            }
        }
    }

    #[test]
    fn prop_single_byte_flip_is_detected(
        message in message(),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=0xFF,
    ) {
        let encoded = encode(&message);
        prop_assume!(encoded.is_ok());
        let mut frame = encoded.unwrap().to_vec();
        // Any byte before the CRC field.
        let position = index.index(frame.len() - 2);
        frame[position] ^= flip;
        let is_checksum_mismatch =
            matches!(decode(&frame), Err(DecodeError::ChecksumMismatch { .. }));
        prop_assert!(is_checksum_mismatch);
    }
}
