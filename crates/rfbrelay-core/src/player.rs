//! Paced replay of a recorded session to a message peer.
//!
//! Playback pins the recorded clock to the wall clock at the first packet
//! (`delta = now - first.timestamp`) and emits every later packet once the
//! wall clock reaches `packet.timestamp + delta`. A drain task reads and
//! discards client traffic so a disconnect is noticed promptly.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Clean end of session file | Playback task exits, peer is closed |
//! | Truncated or corrupt tail | Logged; nothing past the last whole packet is sent |
//! | Client disconnect | Drain task exits, pacing wait is abandoned |
//! | Peer write failure | Playback task exits with the error |

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::DoneSignal;
use crate::clock;
use crate::codec::{CodecError, PacketReader};
use crate::error::Result;
use crate::peer::{Inbound, MessagePeer};
use crate::tasks::{TaskGroup, first_failure, log_outcomes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Longest single sleep of the pacing wait; bounds timing error and
    /// cancellation latency.
    pub pacing_poll: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pacing_poll: Duration::from_millis(1),
        }
    }
}

/// Outcome of one playback session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSummary {
    pub packets: u64,
    pub bytes: u64,
    /// Client messages read and thrown away.
    pub discarded_messages: u64,
    /// The session file was played to a clean end of stream.
    pub clean_end: bool,
    pub ended_by: Option<String>,
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    packets: AtomicU64,
    bytes: AtomicU64,
    discarded: AtomicU64,
    clean_end: AtomicBool,
}

/// Replay `session` to `peer`; returns when playback ends or the client leaves.
pub fn play<P, R>(peer: &P, session: R, config: &PlayerConfig) -> PlaybackSummary
where
    P: MessagePeer + ?Sized,
    R: Read + Send,
{
    let done = DoneSignal::new();
    let progress = Progress::default();
    let poll = config.pacing_poll.max(Duration::from_micros(100));

    let outcomes = thread::scope(|scope| {
        let mut tasks = TaskGroup::new(scope, &done);
        let done = &done;
        let progress = &progress;

        tasks.spawn("drain", move || drain(peer, done, progress));
        tasks.spawn("playback", move || {
            playback(peer, PacketReader::new(session), poll, done, progress)
        });

        let ended_by = done.wait();
        tracing::debug!(task = ended_by, "playback tearing down");
        peer.close();
        tasks.join()
    });

    log_outcomes(&outcomes);
    let summary = PlaybackSummary {
        packets: progress.packets.load(Ordering::Relaxed),
        bytes: progress.bytes.load(Ordering::Relaxed),
        discarded_messages: progress.discarded.load(Ordering::Relaxed),
        clean_end: progress.clean_end.load(Ordering::Relaxed),
        ended_by: done.tripped_by().map(ToOwned::to_owned),
        failure: first_failure(&outcomes),
    };
    tracing::info!(
        packets = summary.packets,
        bytes = summary.bytes,
        clean_end = summary.clean_end,
        "playback end"
    );
    summary
}

fn drain<P: MessagePeer + ?Sized>(peer: &P, done: &DoneSignal, progress: &Progress) -> Result<()> {
    while !done.is_tripped() {
        if let Inbound::Message(_) = peer.read_message()? {
            progress.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
    Ok(())
}

fn playback<P: MessagePeer + ?Sized, R: Read>(
    peer: &P,
    mut packets: PacketReader<R>,
    poll: Duration,
    done: &DoneSignal,
    progress: &Progress,
) -> Result<()> {
    let mut delta: Option<i64> = None;
    loop {
        let packet = match packets.next_packet() {
            Ok(packet) => packet,
            Err(CodecError::EndOfStream) => {
                progress.clean_end.store(true, Ordering::Relaxed);
                return Ok(());
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    packets = progress.packets.load(Ordering::Relaxed),
                    "session file ends mid-packet"
                );
                return Err(error.into());
            }
        };

        let timestamp = packet.header.timestamp;
        match delta {
            None => delta = Some(clock::unix_nanos().saturating_sub(timestamp)),
            Some(delta) => {
                if !wait_until(timestamp.saturating_add(delta), poll, done) {
                    return Ok(());
                }
            }
        }

        peer.write_message(&packet.payload)?;
        progress.packets.fetch_add(1, Ordering::Relaxed);
        progress.bytes.fetch_add(
            u64::try_from(packet.payload.len()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}

/// Sleep in `poll`-sized steps until the wall clock reaches `deadline`
/// (Unix nanoseconds). Returns `false` if the session was cancelled first.
fn wait_until(deadline: i64, poll: Duration, done: &DoneSignal) -> bool {
    loop {
        let now = clock::unix_nanos();
        if now >= deadline {
            return true;
        }
        if done.wait_timeout(clock::nanos_between(now, deadline).min(poll)) {
            return false;
        }
    }
}
