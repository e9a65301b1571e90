//! # Transport
//!
//! Half-duplex request/response cycle over the RS485 link. The port sits
//! behind an async mutex whose guard spans the whole exchange: drop stale
//! input, write the request, read the response. Only one request is ever
//! in flight, no matter how many tasks share the transport.
//!
//! Response frames carry no length prefix on the wire, so a frame ends when
//! the line stays silent for the configured frame gap (the Modbus-RTU t3.5
//! rule).
//!
//! A response that fails to decode, or that does not answer the request, is
//! followed by one more read before the deadline to absorb a noise burst.
//! Every other retry belongs to the caller.

use crate::bus::serial::SerialPort;
use crate::constants::FRAME_MAX_LEN;
use crate::error::TransportError;
use crate::protocol::{frame, ProtocolMessage};
use crate::util::logging::{log_frame_hex, Direction, LogThrottle};
use async_trait::async_trait;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

/// Anything that can carry one request/response exchange.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Sends `message` and waits up to `timeout` for its answer.
    ///
    /// A Modbus exception from the addressed slave is a valid answer and is
    /// returned as [`ProtocolMessage::Error`].
    async fn send_and_await(
        &self,
        message: &ProtocolMessage,
        timeout: Duration,
    ) -> Result<ProtocolMessage, TransportError>;
}

/// Exclusive owner of the serial port.
pub struct Transport<P: SerialPort> {
    port: Mutex<P>,
    frame_gap: Duration,
    noise_log: StdMutex<LogThrottle>,
}

impl<P: SerialPort> Transport<P> {
    pub fn new(port: P, frame_gap: Duration) -> Self {
        Self {
            port: Mutex::new(port),
            frame_gap,
            noise_log: StdMutex::new(LogThrottle::new(Duration::from_secs(60), 5)),
        }
    }

    /// Whether an exchange currently holds the bus.
    pub fn is_busy(&self) -> bool {
        self.port.try_lock().is_err()
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }

    async fn exchange(
        &self,
        message: &ProtocolMessage,
        wait: Duration,
    ) -> Result<ProtocolMessage, TransportError> {
        let request = frame::encode(message)?;
        let mut port = self.port.lock().await;

        port.clear_input().await.map_err(io_error)?;
        log_frame_hex(Direction::Tx, &request);
        port.write_all(&request).await.map_err(io_error)?;
        port.flush().await.map_err(io_error)?;

        let deadline = deadline_after(wait);
        let mut retried = false;
        loop {
            let raw = match read_frame(&mut *port, deadline, self.frame_gap).await {
                Err(TransportError::Timeout) if retried => {
                    return Err(TransportError::Framing(
                        "no valid frame after a corrupted response".to_string(),
                    ))
                }
                other => other?,
            };
            log_frame_hex(Direction::Rx, &raw);

            let failure = match frame::decode(&raw) {
                Ok(response) => match message.check_response(&response) {
                    Ok(()) => return Ok(response),
                    Err(reason) => TransportError::UnexpectedResponse(reason),
                },
                Err(e) => TransportError::Framing(e.to_string()),
            };

            if retried {
                return Err(failure);
            }
            if self.allow_noise_log() {
                log::warn!(
                    "Discarding response to {:?} for {}: {failure}",
                    message.kind(),
                    message.address()
                );
            }
            retried = true;
        }
    }

    fn allow_noise_log(&self) -> bool {
        self.noise_log
            .lock()
            .map(|mut throttle| throttle.allow())
            .unwrap_or(true)
    }
}

#[async_trait]
impl<P: SerialPort> Bus for Transport<P> {
    async fn send_and_await(
        &self,
        message: &ProtocolMessage,
        timeout: Duration,
    ) -> Result<ProtocolMessage, TransportError> {
        self.exchange(message, timeout).await
    }
}

/// `now + wait`, saturating at a far future instant instead of overflowing.
pub(crate) fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

/// Reads one frame: waits for the first byte until `deadline`, then
/// collects bytes until the line is silent for `gap`, the frame overflows,
/// or the deadline passes.
async fn read_frame<P: SerialPort>(
    port: &mut P,
    deadline: Instant,
    gap: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = [0u8; FRAME_MAX_LEN];

    let n = match timeout_at(deadline, port.read(&mut buf)).await {
        Err(_) => return Err(TransportError::Timeout),
        Ok(Err(e)) => return Err(io_error(e)),
        Ok(Ok(0)) => return Err(TransportError::Io("serial port closed".to_string())),
        Ok(Ok(n)) => n,
    };

    let mut frame = Vec::with_capacity(FRAME_MAX_LEN);
    frame.extend_from_slice(&buf[..n]);

    // A line that never goes quiet still ends the frame at the deadline.
    while frame.len() <= FRAME_MAX_LEN {
        let window = deadline_after(gap).min(deadline);
        match timeout_at(window, port.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => frame.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(io_error(e)),
        }
    }

    Ok(frame)
}
