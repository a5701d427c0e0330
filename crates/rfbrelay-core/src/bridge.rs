//! Connection bridge: one live duplex relay between a message peer and a
//! byte-stream upstream.
//!
//! A session runs up to four tasks on scoped threads:
//! - **client-to-server**: each inbound message is written verbatim upstream,
//! - **server-to-client**: each upstream read becomes one binary message and,
//!   when recording, an owned copy handed to the recorder,
//! - **recorder**: persists the handed-off chunks,
//! - **diagnostics**: drains a subprocess's stderr into the log; stderr
//!   closing or failing ends the session like any other task.
//!
//! The first task to exit trips the session's [`DoneSignal`]; the bridge then
//! closes both endpoints, which unblocks the remaining tasks, and joins them.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::DoneSignal;
use crate::error::{RelayError, Result};
use crate::peer::{Inbound, MessagePeer};
use crate::recorder::{
    RecordSummary, RecorderConfig, RecorderSink, SessionRecorder, Submitted, recording_channel,
};
use crate::tasks::{TaskGroup, first_failure, log_outcomes};
use crate::upstream::Upstream;

/// Size of the server-to-client read buffer (1 MiB).
pub const DEFAULT_READ_BUFFER_BYTES: usize = 1 << 20;

const DIAGNOSTICS_BUFFER_BYTES: usize = 8 * 1024;

/// Tuning for bridge sessions.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Largest chunk read from the upstream in one call.
    pub read_buffer_bytes: usize,
    /// Connect timeout when dialing a TCP upstream.
    pub dial_timeout: Duration,
    pub recorder: RecorderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            dial_timeout: Duration::from_secs(10),
            recorder: RecorderConfig::default(),
        }
    }
}

/// Session summary emitted when a bridge session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeSummary {
    /// Upstream label (dial target or process name).
    pub upstream: String,
    /// Messages received from the client.
    pub client_messages: u64,
    /// Bytes written upstream.
    pub client_bytes: u64,
    /// Chunks read from the upstream and forwarded.
    pub server_chunks: u64,
    pub server_bytes: u64,
    /// Chunks the recorder could not accept under the drop policy.
    pub dropped_chunks: u64,
    /// Present when the session was recorded.
    pub recorded: Option<RecordSummary>,
    /// Task whose exit ended the session.
    pub ended_by: Option<String>,
    /// First task failure that was not a normal peer close.
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    client_messages: AtomicU64,
    client_bytes: AtomicU64,
    server_chunks: AtomicU64,
    server_bytes: AtomicU64,
    dropped_chunks: AtomicU64,
}

fn as_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// One bridge session, ready to run.
pub struct Bridge<'p, P: MessagePeer + ?Sized> {
    peer: &'p P,
    upstream: Upstream,
    config: BridgeConfig,
}

impl<'p, P: MessagePeer + ?Sized> Bridge<'p, P> {
    pub fn new(peer: &'p P, upstream: Upstream, config: BridgeConfig) -> Self {
        Self {
            peer,
            upstream,
            config,
        }
    }

    /// Relay until either side ends the session.
    pub fn run(self) -> BridgeSummary {
        self.relay::<io::Sink>(None)
    }

    /// Relay and record every server-to-client chunk into `recorder`.
    pub fn run_recorded<W: Write + Send>(self, recorder: &mut SessionRecorder<W>) -> BridgeSummary {
        self.relay(Some(recorder))
    }

    fn relay<W: Write + Send>(
        self,
        mut recorder: Option<&mut SessionRecorder<W>>,
    ) -> BridgeSummary {
        let Self {
            peer,
            upstream,
            config,
        } = self;
        let label = upstream.label().to_string();
        let Upstream {
            reader,
            writer,
            diagnostics,
            closer,
            ..
        } = upstream;

        tracing::info!(
            upstream = %label,
            recording = recorder.is_some(),
            "bridge session start"
        );

        let done = DoneSignal::new();
        let counters = Counters::default();
        let (sink, chunks) = match recorder {
            Some(_) => {
                let (sink, chunks) = recording_channel(&config.recorder);
                (Some(sink), Some(chunks))
            }
            None => (None, None),
        };

        let outcomes = thread::scope(|scope| {
            let mut tasks = TaskGroup::new(scope, &done);
            let done = &done;
            let counters = &counters;

            tasks.spawn("client-to-server", move || {
                client_to_server(peer, writer, done, counters)
            });
            let buffer_len = config.read_buffer_bytes;
            tasks.spawn("server-to-client", move || {
                server_to_client(peer, reader, sink, buffer_len, done, counters)
            });
            if let (Some(recorder), Some(chunks)) = (recorder.as_deref_mut(), chunks) {
                tasks.spawn("recorder", move || recorder.run(chunks));
            }
            if let Some(stderr) = diagnostics {
                let label = label.as_str();
                tasks.spawn("diagnostics", move || drain_diagnostics(stderr, label));
            }

            let ended_by = done.wait();
            tracing::debug!(task = ended_by, "bridge tearing down");
            closer.close();
            peer.close();
            tasks.join()
        });
        let recorded = recorder.map(|recorder| recorder.summary());

        log_outcomes(&outcomes);
        let summary = BridgeSummary {
            upstream: label,
            client_messages: counters.client_messages.load(Ordering::Relaxed),
            client_bytes: counters.client_bytes.load(Ordering::Relaxed),
            server_chunks: counters.server_chunks.load(Ordering::Relaxed),
            server_bytes: counters.server_bytes.load(Ordering::Relaxed),
            dropped_chunks: counters.dropped_chunks.load(Ordering::Relaxed),
            recorded,
            ended_by: done.tripped_by().map(ToOwned::to_owned),
            failure: first_failure(&outcomes),
        };
        tracing::info!(
            upstream = %summary.upstream,
            client_bytes = summary.client_bytes,
            server_bytes = summary.server_bytes,
            ended_by = summary.ended_by.as_deref().unwrap_or("unknown"),
            "bridge session end"
        );
        summary
    }
}

fn client_to_server<P: MessagePeer + ?Sized>(
    peer: &P,
    mut writer: Box<dyn Write + Send>,
    done: &DoneSignal,
    counters: &Counters,
) -> Result<()> {
    while !done.is_tripped() {
        let Inbound::Message(bytes) = peer.read_message()? else {
            continue;
        };
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|source| RelayError::WriteFailure {
                target: "upstream",
                source,
            })?;
        counters.client_messages.fetch_add(1, Ordering::Relaxed);
        counters
            .client_bytes
            .fetch_add(as_u64(bytes.len()), Ordering::Relaxed);
    }
    Ok(())
}

fn server_to_client<P: MessagePeer + ?Sized>(
    peer: &P,
    mut reader: Box<dyn Read + Send>,
    sink: Option<RecorderSink>,
    buffer_len: usize,
    done: &DoneSignal,
    counters: &Counters,
) -> Result<()> {
    let mut buffer = vec![0_u8; buffer_len.max(1)];
    while !done.is_tripped() {
        let n = match reader.read(&mut buffer) {
            Ok(0) => return Err(RelayError::PeerClosed),
            Ok(n) => n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(RelayError::ReadFailure {
                    target: "upstream",
                    source,
                });
            }
        };
        let chunk = &buffer[..n];
        peer.write_message(chunk)?;
        counters.server_chunks.fetch_add(1, Ordering::Relaxed);
        counters
            .server_bytes
            .fetch_add(as_u64(n), Ordering::Relaxed);

        // The buffer is reused by the next read, so the recorder gets its own copy.
        if let Some(recorder) = &sink {
            match recorder.submit(chunk.to_vec()) {
                Ok(Submitted::Accepted) => {}
                Ok(Submitted::Dropped) => {
                    counters.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                }
                // The recorder task has already ended the session and reports
                // its own failure.
                Err(error) => {
                    tracing::debug!(%error, "recorder stopped, ending relay");
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn drain_diagnostics(mut stderr: Box<dyn Read + Send>, label: &str) -> Result<()> {
    let mut buffer = [0_u8; DIAGNOSTICS_BUFFER_BYTES];
    loop {
        match stderr.read(&mut buffer) {
            Ok(0) => return Err(RelayError::PeerClosed),
            Ok(n) => {
                let text = String::from_utf8_lossy(&buffer[..n]);
                tracing::warn!(upstream = label, "{}", text.trim_end());
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(RelayError::ReadFailure {
                    target: "upstream diagnostics",
                    source,
                });
            }
        }
    }
}
