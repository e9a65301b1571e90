//! Tests for the logging helpers of the `airios-rs` crate.

use airios_rs::logging::{
    describe_change, init_logger, init_test_logger, log_change, log_debug, log_error, log_info,
    log_warn,
};
use airios_rs::device::{Parameter, Value};
use airios_rs::state::{ReadingSource, StateChange};
use airios_rs::util::logging::{log_frame_hex, Direction};
use chrono::Utc;

/// Tests that the logging helpers work after init, capturing the log output.
#[test]
fn test_logging() {
    init_test_logger();
    log_error("This is an error message");
    log_warn("This is a warning message");
    log_info("This is an info message");
    log_debug("This is a debug message");
    log_frame_hex(Direction::Tx, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
}

/// Tests that initializing twice does not panic.
#[test]
fn test_init_logger() {
    init_logger();
    init_logger();
}

#[test]
fn test_change_lines() {
    let change = StateChange {
        address: 207,
        parameter: Parameter::RfCommLost,
        previous: Some(Value::Boolean(false)),
        current: Value::Boolean(true),
        valid: true,
        source: ReadingSource::Polled,
        timestamp: Utc::now(),
    };
    assert_eq!(describe_change(&change), "207: rf_comm_lost false -> true");
    log_change(&change);
}
