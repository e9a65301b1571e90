#![no_main]

use airios_rs::protocol::{crc16, decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must fail gracefully
    let _ = decode(data);

    // Reseal with a valid CRC so the body parsers are reached
    if data.len() >= 2 {
        let mut sealed = data.to_vec();
        let crc = crc16(&sealed);
        sealed.extend_from_slice(&crc.to_le_bytes());
        if let Ok(message) = decode(&sealed) {
            // Whatever decodes must encode back to the same frame
            let frame = encode(&message).expect("decoded message must encode");
            assert_eq!(decode(&frame), Ok(message));
        }
    }
});
