//! The bus module owns the physical link to the RF bridge: the serial port
//! abstraction, the half-duplex [`Transport`] and a hardware-free mock.

pub mod mock;
pub mod serial;
pub mod transport;

pub use mock::{MockSerialPort, SimulatedBridge};
pub use serial::SerialPort;
pub use transport::{Bus, Transport};
