//! # RS485 Serial Port
//!
//! The [`SerialPort`] trait is what the transport needs from a port: async
//! reads and writes plus the ability to drop stale input before a request.
//! It is implemented for `tokio_serial::SerialStream` and for the
//! hardware-free [`MockSerialPort`](crate::bus::mock::MockSerialPort).

use crate::config::{Parity, SerialSettings};
use crate::error::GatewayError;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Serial port operations used by the transport.
#[async_trait::async_trait]
pub trait SerialPort: AsyncRead + AsyncWrite + Unpin + Send {
    /// Discards bytes received but not yet read.
    async fn clear_input(&mut self) -> io::Result<()>;
}

#[async_trait::async_trait]
impl SerialPort for SerialStream {
    async fn clear_input(&mut self) -> io::Result<()> {
        tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// Opens the RS485 adapter described by `settings`.
pub fn open(settings: &SerialSettings) -> Result<SerialStream, GatewayError> {
    let data_bits = match settings.data_bits {
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(GatewayError::SerialPortError(format!(
                "unsupported data bits: {other}"
            )))
        }
    };
    let stop_bits = match settings.stop_bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        other => {
            return Err(GatewayError::SerialPortError(format!(
                "unsupported stop bits: {other}"
            )))
        }
    };
    let parity = match settings.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };

    log::info!(
        "Opening {} at {} baud ({}{}{})",
        settings.port,
        settings.baud_rate,
        settings.data_bits,
        settings.parity.code(),
        settings.stop_bits
    );

    tokio_serial::new(&settings.port, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .open_native_async()
        .map_err(|e| GatewayError::SerialPortError(format!("{}: {e}", settings.port)))
}
