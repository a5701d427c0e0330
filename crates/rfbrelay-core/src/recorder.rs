//! Session recorder.
//!
//! The bridge's server-to-client task hands each forwarded chunk to a
//! [`RecorderSink`]; a dedicated task drains the matching [`ChunkReceiver`]
//! into a session file with [`SessionRecorder::run`].
//!
//! With [`OverflowPolicy::Block`] (the default) and zero capacity, every
//! hand-off is a rendezvous: a slow disk throttles the live relay instead of
//! losing recorded data. [`OverflowPolicy::Drop`] trades completeness for
//! relay latency.

use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use serde::Serialize;

use crate::clock;
use crate::codec::{PacketHeader, write_packet};
use crate::error::{RelayError, Result};

/// What the sink does when the recorder is not ready for the next chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Block the relay until the recorder accepts the chunk.
    #[default]
    Block,
    /// Discard the chunk and keep relaying.
    Drop,
}

/// Hand-off channel configuration between the relay and the recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Chunks that may queue before the overflow policy applies. Zero means
    /// every hand-off waits for the recorder.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

/// One observed server-to-client chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Observation time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub bytes: Vec<u8>,
}

pub type ChunkReceiver = Receiver<Chunk>;

/// Result of handing a chunk to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Accepted,
    Dropped,
}

/// Relay-side handle of the recording channel.
#[derive(Debug)]
pub struct RecorderSink {
    sender: SyncSender<Chunk>,
    overflow: OverflowPolicy,
}

/// Create a linked sink/receiver pair.
#[must_use]
pub fn recording_channel(config: &RecorderConfig) -> (RecorderSink, ChunkReceiver) {
    let (sender, receiver) = mpsc::sync_channel(config.capacity);
    (
        RecorderSink {
            sender,
            overflow: config.overflow,
        },
        receiver,
    )
}

impl RecorderSink {
    /// Stamp `bytes` with the current time and hand them to the recorder.
    ///
    /// Fails once the recorder has stopped.
    pub fn submit(&self, bytes: Vec<u8>) -> Result<Submitted> {
        let chunk = Chunk {
            timestamp: clock::unix_nanos(),
            bytes,
        };
        match self.overflow {
            OverflowPolicy::Block => self
                .sender
                .send(chunk)
                .map(|()| Submitted::Accepted)
                .map_err(|_| recorder_gone()),
            OverflowPolicy::Drop => match self.sender.try_send(chunk) {
                Ok(()) => Ok(Submitted::Accepted),
                Err(TrySendError::Full(_)) => Ok(Submitted::Dropped),
                Err(TrySendError::Disconnected(_)) => Err(recorder_gone()),
            },
        }
    }
}

fn recorder_gone() -> RelayError {
    RelayError::WriteFailure {
        target: "recorder",
        source: io::Error::new(io::ErrorKind::BrokenPipe, "recorder stopped"),
    }
}

/// Counters for one recorded session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub packets: u64,
    pub bytes: u64,
}

/// Appends packets to a session stream.
#[derive(Debug)]
pub struct SessionRecorder<W: Write> {
    out: W,
    summary: RecordSummary,
}

impl<W: Write> SessionRecorder<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            summary: RecordSummary::default(),
        }
    }

    /// Write one packet: header, then payload.
    pub fn append(&mut self, timestamp: i64, payload: &[u8]) -> Result<()> {
        let header = PacketHeader::data(timestamp, payload.len());
        write_packet(&mut self.out, &header, payload).map_err(|source| {
            RelayError::WriteFailure {
                target: "session file",
                source,
            }
        })?;
        self.summary.packets += 1;
        self.summary.bytes = self
            .summary
            .bytes
            .saturating_add(u64::try_from(payload.len()).unwrap_or(u64::MAX));
        Ok(())
    }

    /// Drain `chunks` until the sending side closes, then flush.
    ///
    /// Stops at the first write failure, leaving every earlier packet intact.
    pub fn run(&mut self, chunks: ChunkReceiver) -> Result<()> {
        for chunk in chunks {
            self.append(chunk.timestamp, &chunk.bytes)?;
        }
        self.out.flush().map_err(|source| RelayError::WriteFailure {
            target: "session file",
            source,
        })
    }

    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        self.summary
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketReader;
    use std::io::Cursor;
    use std::thread;
    use std::time::Duration;

    struct FailAfter {
        remaining: usize,
        written: Vec<u8>,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::other("disk full"));
            }
            self.remaining -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn config_default_is_blocking_rendezvous() {
        let config = RecorderConfig::default();
        assert_eq!(config.capacity, 0);
        assert_eq!(config.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn records_chunks_in_order_with_timestamps() {
        let (sink, receiver) = recording_channel(&RecorderConfig::default());
        let writer = thread::spawn(move || {
            let mut recorder = SessionRecorder::new(Vec::new());
            recorder.run(receiver).expect("record");
            (recorder.summary(), recorder.into_inner())
        });

        assert_eq!(sink.submit(b"AAAA".to_vec()).expect("submit"), Submitted::Accepted);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.submit(b"BB".to_vec()).expect("submit"), Submitted::Accepted);
        drop(sink);

        let (summary, bytes) = writer.join().expect("recorder thread");
        assert_eq!(summary, RecordSummary { packets: 2, bytes: 6 });

        let packets: Vec<_> = PacketReader::new(Cursor::new(bytes))
            .collect::<std::result::Result<_, _>>()
            .expect("clean session");
        assert_eq!(packets[0].payload, b"AAAA");
        assert_eq!(packets[1].payload, b"BB");
        let gap = packets[1].header.timestamp - packets[0].header.timestamp;
        assert!(gap >= 20_000_000, "gap was {gap}ns");
    }

    #[test]
    fn write_failure_stops_recorder_and_fails_sink() {
        let (sink, receiver) = recording_channel(&RecorderConfig::default());
        let writer = thread::spawn(move || {
            // header + payload of the first packet, then the disk fills up
            let mut recorder = SessionRecorder::new(FailAfter {
                remaining: 2,
                written: Vec::new(),
            });
            let result = recorder.run(receiver);
            (result, recorder.summary(), recorder.into_inner().written)
        });

        sink.submit(b"first".to_vec()).expect("first accepted");
        let mut gone = false;
        for _ in 0..3 {
            if sink.submit(b"more".to_vec()).is_err() {
                gone = true;
                break;
            }
        }
        assert!(gone, "sink should fail once the recorder stops");

        let (result, summary, written) = writer.join().expect("recorder thread");
        assert!(matches!(
            result,
            Err(RelayError::WriteFailure {
                target: "session file",
                ..
            })
        ));
        assert_eq!(summary.packets, 1);
        let packets: Vec<_> = PacketReader::new(Cursor::new(written))
            .collect::<std::result::Result<_, _>>()
            .expect("partial session stays readable");
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn drop_policy_discards_when_recorder_is_busy() {
        let (sink, receiver) = recording_channel(&RecorderConfig {
            capacity: 1,
            overflow: OverflowPolicy::Drop,
        });
        assert_eq!(sink.submit(b"a".to_vec()).expect("queued"), Submitted::Accepted);
        assert_eq!(sink.submit(b"b".to_vec()).expect("full"), Submitted::Dropped);
        drop(sink);

        let mut recorder = SessionRecorder::new(Vec::new());
        recorder.run(receiver).expect("record");
        assert_eq!(recorder.summary().packets, 1);
    }

    #[test]
    fn submit_after_receiver_dropped_fails() {
        let (sink, receiver) = recording_channel(&RecorderConfig::default());
        drop(receiver);
        let error = sink.submit(b"x".to_vec()).expect_err("gone");
        assert!(matches!(error, RelayError::WriteFailure { target: "recorder", .. }));
    }
}
