//! Transport tests against the mock serial port and the bridge simulator.

use airios_rs::bus::{Bus, MockSerialPort, SimulatedBridge, Transport};
use airios_rs::constants::{
    DEFAULT_FRAME_GAP, PRODUCT_ID_VMD_07RPS13, REG_PRODUCT_ID, REG_SUPPLY_FAN_SPEED,
};
use airios_rs::protocol::{encode, ProtocolMessage};
use airios_rs::TransportError;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(500);

fn read(address: u8, register: u16, count: u16) -> ProtocolMessage {
    ProtocolMessage::ReadRequest {
        address,
        register,
        count,
    }
}

fn bridge_with_unit() -> SimulatedBridge {
    let bridge = SimulatedBridge::new(207, 0x00A0_00CF);
    bridge.add_node(2, PRODUCT_ID_VMD_07RPS13, 0x00A0_0002);
    bridge.set_register(2, REG_SUPPLY_FAN_SPEED, 55);
    bridge
}

#[tokio::test(start_paused = true)]
async fn test_request_bytes_on_the_wire() {
    let bridge = bridge_with_unit();
    let port = bridge.port();
    let transport = Transport::new(port.clone(), DEFAULT_FRAME_GAP);

    let request = read(2, REG_SUPPLY_FAN_SPEED, 1);
    let response = transport.send_and_await(&request, WAIT).await.unwrap();

    assert_eq!(port.tx_frames(), vec![encode(&request).unwrap().to_vec()]);
    assert_eq!(
        response,
        ProtocolMessage::ReadResponse {
            address: 2,
            registers: vec![55]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_slave_times_out_and_releases_bus() {
    let bridge = bridge_with_unit();
    bridge.set_silent(2, true);
    let transport = Transport::new(bridge.port(), DEFAULT_FRAME_GAP);

    let err = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), WAIT)
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert!(!transport.is_busy());

    // The bus is usable right away.
    let response = transport
        .send_and_await(&read(207, REG_PRODUCT_ID, 2), WAIT)
        .await
        .unwrap();
    assert_eq!(response.address(), 207);
}

#[tokio::test(start_paused = true)]
async fn test_noise_burst_is_absorbed() {
    let bridge = bridge_with_unit();
    bridge.noisy_replies(1);
    let transport = Transport::new(bridge.port(), DEFAULT_FRAME_GAP);

    let response = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), WAIT)
        .await
        .unwrap();
    assert!(matches!(response, ProtocolMessage::ReadResponse { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_reply_surfaces_framing() {
    let bridge = bridge_with_unit();
    bridge.corrupt_replies(1);
    let transport = Transport::new(bridge.port(), DEFAULT_FRAME_GAP);
    let request = read(2, REG_SUPPLY_FAN_SPEED, 1);

    let err = transport.send_and_await(&request, WAIT).await.unwrap_err();
    assert!(matches!(err, TransportError::Framing(_)));
    assert!(err.is_retryable());

    // Retrying belongs to the caller and succeeds once the line is clean.
    assert!(transport.send_and_await(&request, WAIT).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reply_from_wrong_slave_is_rejected() {
    let port = MockSerialPort::new();
    let stray = encode(&ProtocolMessage::ReadResponse {
        address: 9,
        registers: vec![1],
    })
    .unwrap()
    .to_vec();
    port.queue_reply(vec![stray.clone(), stray]);
    let transport = Transport::new(port, DEFAULT_FRAME_GAP);

    let err = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnexpectedResponse(_)));
}

#[tokio::test(start_paused = true)]
async fn test_io_error_is_not_retryable() {
    let port = MockSerialPort::new();
    port.set_next_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"));
    let transport = Transport::new(port, DEFAULT_FRAME_GAP);

    let err = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Io(_)));
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_are_serialized() {
    let bridge = bridge_with_unit();
    let port = bridge.port();
    let transport = Arc::new(Transport::new(port.clone(), DEFAULT_FRAME_GAP));

    let mut tasks = Vec::new();
    for request in [read(2, REG_SUPPLY_FAN_SPEED, 1), read(207, REG_PRODUCT_ID, 2)] {
        let transport = Arc::clone(&transport);
        tasks.push(tokio::spawn(async move {
            let response = transport.send_and_await(&request, WAIT).await.unwrap();
            (request, response)
        }));
    }

    for task in tasks {
        let (request, response) = task.await.unwrap();
        assert_eq!(request.check_response(&response), Ok(()));
    }
    assert_eq!(port.tx_frames().len(), 2);
    assert_eq!(bridge.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_endless_noise_ends_at_the_deadline() {
    // Bursts arrive faster than the frame gap, so the line never goes quiet.
    let port = MockSerialPort::new().with_burst_gap(Duration::from_millis(10));
    port.queue_reply(vec![vec![0xAA]; 2000]);
    let transport = Transport::new(port, DEFAULT_FRAME_GAP);
    let started = tokio::time::Instant::now();

    let err = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Framing(_)), "{err:?}");
    let elapsed = started.elapsed();
    assert!(elapsed <= Duration::from_millis(1050), "{elapsed:?}");
    assert!(!transport.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_burst_is_discarded() {
    let port = MockSerialPort::new();
    port.queue_reply(vec![vec![0x55; 600]]);
    let transport = Transport::new(port.clone(), DEFAULT_FRAME_GAP);

    let err = transport
        .send_and_await(&read(2, REG_SUPPLY_FAN_SPEED, 1), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Framing(_)), "{err:?}");

    // The wire log still holds the request bytes.
    assert_eq!(
        port.get_tx_data(),
        encode(&read(2, REG_SUPPLY_FAN_SPEED, 1)).unwrap().to_vec()
    );
}
