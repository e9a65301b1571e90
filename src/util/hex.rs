//! # Hex Formatting
//!
//! Helpers for showing frames in logs and for reading frames typed in by a
//! user, built on the `hex` crate.
//!
//! ```rust
//! use airios_rs::util::hex::{decode_hex, format_hex_compact};
//!
//! let frame = decode_hex("cf 03 00 00 00 02").unwrap();
//! assert_eq!(format_hex_compact(&frame), "cf 03 00 00 00 02");
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Decodes a hex string, ignoring whitespace and `:`/`-` separators.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Formats bytes as "cf 03 00 00" for logs.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_separators() {
        let expected = vec![0xCF, 0x03, 0x00, 0x6B];
        assert_eq!(decode_hex("cf 03 00 6b").unwrap(), expected);
        assert_eq!(decode_hex("CF:03-00:6B").unwrap(), expected);
        assert_eq!(decode_hex("cf03006b").unwrap(), expected);
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x01, 0x03, 0xC5, 0xCD]), "01 03 c5 cd");
        assert_eq!(format_hex_compact(&[]), "");
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex("  "), Err(HexError::EmptyString));
        assert_eq!(decode_hex("abc"), Err(HexError::OddLength(3)));
        assert!(matches!(decode_hex("GG"), Err(HexError::DecodeError(_))));
    }
}
