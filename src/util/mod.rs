//! # Utility Modules
//!
//! Hex formatting and frame logging helpers shared by the transport and the
//! command line tool.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, format_hex_compact, HexError};
pub use logging::{log_frame_hex, Direction, LogThrottle};
