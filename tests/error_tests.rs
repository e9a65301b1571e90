//! Unit tests for the error enums and their `Display` implementations.

use airios_rs::device::Parameter;
use airios_rs::protocol::ExceptionCode;
use airios_rs::{CommandFailed, DecodeError, GatewayError, RegistryError, TransportError};

#[test]
fn test_checksum_mismatch_display() {
    let err = DecodeError::ChecksumMismatch {
        expected: 0x0A84,
        calculated: 0x1234,
    };
    assert_eq!(
        err.to_string(),
        "Checksum mismatch: expected 0x0A84, calculated 0x1234"
    );
}

#[test]
fn test_unknown_kind_display() {
    assert_eq!(DecodeError::UnknownKind(0x2B).to_string(), "Unknown message kind: 0x2B");
}

#[test]
fn test_transport_retry_classification() {
    assert!(TransportError::Timeout.is_retryable());
    assert!(TransportError::Framing("short".into()).is_retryable());
    assert!(TransportError::UnexpectedResponse("slave 9".into()).is_retryable());
    assert!(!TransportError::Io("unplugged".into()).is_retryable());
}

#[test]
fn test_registry_error_display() {
    assert_eq!(
        RegistryError::DuplicateAddress(2).to_string(),
        "Device address 2 is already registered"
    );
    assert_eq!(
        RegistryError::NotFound(42).to_string(),
        "No device registered at address 42"
    );
}

#[test]
fn test_command_failed_wraps_registry_error() {
    let err: CommandFailed = RegistryError::NotFound(7).into();
    assert_eq!(err.to_string(), "No device registered at address 7");
    assert!(CommandFailed::Rejected(ExceptionCode::DeviceBusy)
        .to_string()
        .starts_with("Command rejected by device"));
}

#[test]
fn test_gateway_error_is_transparent() {
    let err: GatewayError = TransportError::Timeout.into();
    assert_eq!(err.to_string(), "Timed out waiting for response");

    let err = GatewayError::MissingValue {
        address: 207,
        parameter: Parameter::ProductId,
    };
    assert!(err.to_string().starts_with("Device 207 returned no usable value"));
}
