//! In-process message peer backed by channels.
//!
//! Useful for embedding the relay behind a transport other than a raw
//! WebSocket, and for exercising bridges and playback without sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::peer::{Inbound, MessagePeer};

/// The relay-facing half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: Mutex<Receiver<Vec<u8>>>,
    outbound: Mutex<Option<Sender<Vec<u8>>>>,
    closed: AtomicBool,
    poll: Duration,
}

/// The client-facing half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    to_peer: Option<Sender<Vec<u8>>>,
    from_peer: Receiver<Vec<u8>>,
}

/// Create a connected peer/client pair. `poll` bounds each idle read.
#[must_use]
pub fn memory_pair(poll: Duration) -> (MemoryPeer, MemoryClient) {
    let (to_peer, inbound) = mpsc::channel();
    let (outbound, from_peer) = mpsc::channel();
    (
        MemoryPeer {
            inbound: Mutex::new(inbound),
            outbound: Mutex::new(Some(outbound)),
            closed: AtomicBool::new(false),
            poll,
        },
        MemoryClient {
            to_peer: Some(to_peer),
            from_peer,
        },
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryPeer {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl MessagePeer for MemoryPeer {
    fn read_message(&self) -> Result<Inbound> {
        if self.is_closed() {
            return Err(RelayError::PeerClosed);
        }
        match lock(&self.inbound).recv_timeout(self.poll) {
            Ok(bytes) => Ok(Inbound::Message(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(Inbound::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(RelayError::PeerClosed),
        }
    }

    fn write_message(&self, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::PeerClosed);
        }
        match lock(&self.outbound).as_ref() {
            Some(sender) => sender
                .send(payload.to_vec())
                .map_err(|_| RelayError::PeerClosed),
            None => Err(RelayError::PeerClosed),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.outbound).take();
    }
}

impl MemoryClient {
    /// Send one message to the peer. Returns `false` once the peer is gone.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.to_peer
            .as_ref()
            .is_some_and(|sender| sender.send(bytes.into()).is_ok())
    }

    /// Wait for the next message from the peer.
    ///
    /// `Err(Disconnected)` means the peer closed and every message was drained.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Vec<u8>, RecvTimeoutError> {
        self.from_peer.recv_timeout(timeout)
    }

    /// Hang up the client side; the peer's next read reports `PeerClosed`.
    pub fn disconnect(&mut self) {
        self.to_peer = None;
    }
}
