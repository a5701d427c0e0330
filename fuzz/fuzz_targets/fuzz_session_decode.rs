#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use rfbrelay_core::codec::{PacketReader, SessionStats, decode_header};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a session file: decoding must never panic, and a
    // declared length must never be trusted for allocation.
    let _ = decode_header(data);

    let mut decoded = 0_u64;
    for packet in PacketReader::new(Cursor::new(data)) {
        match packet {
            Ok(_) => decoded += 1,
            Err(_) => break,
        }
    }

    let stats = SessionStats::scan(Cursor::new(data));
    assert_eq!(stats.packets, decoded);
});
