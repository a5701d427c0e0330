#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rfbrelay_core::SessionRecorder;
use rfbrelay_core::codec::PacketReader;

#[derive(Debug, Arbitrary)]
struct Input {
    chunks: Vec<(i64, Vec<u8>)>,
    cut: u16,
}

fuzz_target!(|input: Input| {
    // A recorded session torn at any offset decodes to a prefix of what was
    // recorded, never to altered payloads.
    let mut recorder = SessionRecorder::new(Vec::new());
    for (timestamp, bytes) in &input.chunks {
        if recorder.append(*timestamp, bytes).is_err() {
            return;
        }
    }
    let session = recorder.into_inner();
    let cut = usize::from(input.cut).min(session.len());

    let mut index = 0;
    for packet in PacketReader::new(Cursor::new(&session[..cut])) {
        let Ok(packet) = packet else { break };
        let (timestamp, bytes) = &input.chunks[index];
        assert_eq!(packet.header.timestamp, *timestamp);
        assert_eq!(&packet.payload, bytes);
        index += 1;
    }
});
