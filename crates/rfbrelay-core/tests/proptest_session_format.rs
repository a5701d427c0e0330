//! Property-based tests for the session file format and the relay.
//!
//! 1. **Truncation** - cutting a session file at any byte offset yields
//!    exactly the packets that lie wholly before the cut, then a decode error
//!    (or a clean end when the cut falls on a packet boundary).
//!
//! 2. **Garbage** - arbitrary bytes never panic the decoder, and the stats
//!    walk never reports more payload than the input holds.
//!
//! 3. **Recorder order** - chunks submitted to a recorder come back in
//!    order with identical payloads and non-decreasing timestamps.
//!
//! 4. **Client-to-server concatenation** - whatever message split the
//!    client uses, the upstream receives the exact byte concatenation.

use std::io::{Cursor, Read};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use rfbrelay_core::codec::{HEADER_LEN, PacketHeader, PacketReader, SessionStats, write_packet};
use rfbrelay_core::recorder::recording_channel;
use rfbrelay_core::{Bridge, BridgeConfig, RecorderConfig, SessionRecorder, Upstream, memory_pair};

// ── Strategies ──────────────────────────────────────────────────────────

fn payloads_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..12)
}

fn session_bytes(payloads: &[Vec<u8>]) -> (Vec<u8>, Vec<usize>) {
    let mut buf = Vec::new();
    let mut ends = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        let ts = 1_000 * i64::try_from(i).expect("small index");
        write_packet(&mut buf, &PacketHeader::data(ts, payload.len()), payload)
            .expect("write to vec");
        ends.push(buf.len());
    }
    (buf, ends)
}

// ── Decoder properties ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn truncation_keeps_only_whole_packets(
        payloads in payloads_strategy(),
        cut_seed in any::<prop::sample::Index>(),
    ) {
        let (bytes, ends) = session_bytes(&payloads);
        let cut = cut_seed.index(bytes.len() + 1);
        let whole = ends.iter().filter(|&&end| end <= cut).count();
        let on_boundary = cut == 0 || ends.contains(&cut);

        let mut reader = PacketReader::new(Cursor::new(&bytes[..cut]));
        let mut decoded = Vec::new();
        let mut failed = false;
        for packet in reader.by_ref() {
            match packet {
                Ok(packet) => decoded.push(packet.payload),
                Err(error) => {
                    prop_assert!(error.is_corrupt(), "unexpected error kind: {}", error);
                    failed = true;
                }
            }
        }

        prop_assert_eq!(decoded.len(), whole);
        prop_assert_eq!(&decoded[..], &payloads[..whole]);
        prop_assert_eq!(failed, !on_boundary);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let stats = SessionStats::scan(Cursor::new(&bytes));
        let budget = u64::try_from(bytes.len()).expect("small input");
        prop_assert!(stats.payload_bytes + stats.packets * HEADER_LEN as u64 <= budget);
        prop_assert_eq!(stats.is_clean(), stats.corruption.is_none());
    }
}

// ── Recorder properties ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn recorder_preserves_order_and_payloads(payloads in payloads_strategy()) {
        let (sink, chunks) = recording_channel(&RecorderConfig::default());
        let writer = thread::spawn(move || {
            let mut recorder = SessionRecorder::new(Vec::new());
            recorder.run(chunks).map(|()| recorder.into_inner())
        });
        for payload in &payloads {
            sink.submit(payload.clone()).expect("recorder alive");
        }
        drop(sink);
        let bytes = writer.join().expect("recorder thread").expect("recorded");

        let packets: Vec<_> = PacketReader::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .expect("clean session");
        prop_assert_eq!(packets.len(), payloads.len());
        for (packet, payload) in packets.iter().zip(&payloads) {
            prop_assert_eq!(&packet.payload, payload);
        }
        prop_assert!(packets.windows(2).all(|w| w[0].header.timestamp <= w[1].header.timestamp));
    }
}

// ── Relay properties ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn client_bytes_arrive_concatenated(messages in payloads_strategy()) {
        let listener =
            TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let collector = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut received = Vec::new();
            stream.read_to_end(&mut received).expect("read");
            received
        });

        let upstream = Upstream::dial(&addr.to_string(), Duration::from_secs(1)).expect("dial");
        let (peer, mut client) = memory_pair(Duration::from_millis(5));
        let bridge = thread::spawn(move || Bridge::new(&peer, upstream, BridgeConfig::default()).run());

        for message in &messages {
            prop_assert!(client.send(message.clone()));
        }
        client.disconnect();
        let summary = bridge.join().expect("bridge thread");

        let expected: Vec<u8> = messages.concat();
        prop_assert_eq!(collector.join().expect("collector"), expected);
        prop_assert_eq!(summary.client_messages, messages.len() as u64);
    }
}
