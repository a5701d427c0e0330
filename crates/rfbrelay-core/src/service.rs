//! Session entry points for a routing layer.
//!
//! Each function takes an already-upgraded message peer, sets up the other
//! endpoint, and runs the session to completion. Setup failures are returned
//! as errors after the peer has been closed; failures during the session are
//! reported in the returned summary.

use std::io::BufReader;
use std::process::Command;

use crate::bridge::{Bridge, BridgeConfig, BridgeSummary};
use crate::error::Result;
use crate::peer::MessagePeer;
use crate::player::{PlaybackSummary, PlayerConfig, play};
use crate::recorder::SessionRecorder;
use crate::store::SessionStore;
use crate::upstream::Upstream;

fn setup<T, P: MessagePeer + ?Sized>(peer: &P, result: Result<T>) -> Result<T> {
    if let Err(error) = &result {
        tracing::warn!(%error, "session setup failed");
        peer.close();
    }
    result
}

/// Dial `target` and relay without recording.
pub fn bridge_live<P: MessagePeer + ?Sized>(
    peer: &P,
    target: &str,
    config: &BridgeConfig,
) -> Result<BridgeSummary> {
    let upstream = setup(peer, Upstream::dial(target, config.dial_timeout))?;
    Ok(Bridge::new(peer, upstream, config.clone()).run())
}

/// Dial `target`, relay, and record the server's stream as session `id`.
///
/// The session file is only created once the dial succeeded.
pub fn bridge_recorded<P: MessagePeer + ?Sized>(
    peer: &P,
    target: &str,
    store: &SessionStore,
    id: &str,
    config: &BridgeConfig,
) -> Result<BridgeSummary> {
    let upstream = setup(peer, Upstream::dial(target, config.dial_timeout))?;
    let file = setup(peer, store.create(id))?;
    tracing::info!(session = id, "recording session");

    let mut recorder = SessionRecorder::new(file);
    let summary = Bridge::new(peer, upstream, config.clone()).run_recorded(&mut recorder);
    if let Err(error) = recorder.get_ref().sync_all() {
        tracing::warn!(session = id, %error, "session file sync failed");
    }
    Ok(summary)
}

/// Spawn `command` and relay to its stdin/stdout, logging its stderr.
pub fn bridge_process<P: MessagePeer + ?Sized>(
    peer: &P,
    command: &mut Command,
    label: &str,
    config: &BridgeConfig,
) -> Result<BridgeSummary> {
    let upstream = setup(peer, Upstream::spawn(command, label))?;
    Ok(Bridge::new(peer, upstream, config.clone()).run())
}

/// Replay session `id` at its recorded pace.
pub fn replay<P: MessagePeer + ?Sized>(
    peer: &P,
    store: &SessionStore,
    id: &str,
    config: &PlayerConfig,
) -> Result<PlaybackSummary> {
    let file = setup(peer, store.open(id))?;
    tracing::info!(session = id, "replaying session");
    Ok(play(peer, BufReader::new(file), config))
}
