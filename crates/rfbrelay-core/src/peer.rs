//! Message-oriented peers.
//!
//! A [`MessagePeer`] exchanges whole messages rather than a byte stream. The
//! bridge and the player share one peer between a reading task and a writing
//! task, so every method takes `&self`.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tungstenite::error::ProtocolError;
use tungstenite::{Message, WebSocket};

use crate::error::{RelayError, Result};

/// Outcome of one read attempt on a message peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete message.
    Message(Vec<u8>),
    /// Nothing arrived within the poll interval (or only control traffic did).
    Idle,
}

/// A full-duplex, message-oriented endpoint (e.g. an upgraded WebSocket).
pub trait MessagePeer: Send + Sync {
    /// Read the next whole message.
    ///
    /// Returns [`Inbound::Idle`] after at most one poll interval so callers can
    /// check for cancellation between reads. A closed peer is reported as
    /// [`RelayError::PeerClosed`].
    fn read_message(&self) -> Result<Inbound>;

    /// Send `payload` as one binary message.
    fn write_message(&self, payload: &[u8]) -> Result<()>;

    /// Close the peer and unblock pending reads and writes. Idempotent.
    fn close(&self);
}

/// Transport errors that mean the client went away.
fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Map a tungstenite failure, folding every form of client disconnect into
/// [`RelayError::PeerClosed`].
fn classify(error: tungstenite::Error, target: &'static str, writing: bool) -> RelayError {
    match error {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            RelayError::PeerClosed
        }
        tungstenite::Error::Io(source) if is_disconnect(source.kind()) => RelayError::PeerClosed,
        tungstenite::Error::Io(source) if writing => RelayError::WriteFailure { target, source },
        tungstenite::Error::Io(source) => RelayError::ReadFailure { target, source },
        other => RelayError::WebSocket(other),
    }
}

/// Server-side WebSocket peer over a plain TCP stream.
///
/// Reads wait for socket readiness with `peek` outside the lock, then decode
/// under the lock in non-blocking mode, so a reader never holds the lock
/// while idle and writers are never starved.
pub struct WsPeer {
    socket: Mutex<WebSocket<TcpStream>>,
    raw: TcpStream,
    buffered: AtomicBool,
    closed: AtomicBool,
}

impl WsPeer {
    /// Default cancellation-check granularity for reads.
    pub const DEFAULT_POLL: Duration = Duration::from_millis(20);

    const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new(socket: WebSocket<TcpStream>, poll: Duration) -> io::Result<Self> {
        let raw = socket.get_ref().try_clone()?;
        raw.set_nonblocking(false)?;
        raw.set_read_timeout(Some(poll.max(Duration::from_millis(1))))?;
        Ok(Self {
            socket: Mutex::new(socket),
            raw,
            buffered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WebSocket<TcpStream>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_failure(source: io::Error) -> RelayError {
        RelayError::ReadFailure {
            target: "websocket",
            source,
        }
    }

    /// Wait until the socket has bytes (or EOF) without taking the lock.
    fn wait_readable(&self) -> Result<bool> {
        let mut probe = [0_u8; 1];
        match self.raw.peek(&mut probe) {
            Ok(_) => Ok(true),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(false)
            }
            Err(error) if is_disconnect(error.kind()) => Err(RelayError::PeerClosed),
            Err(error) => Err(Self::read_failure(error)),
        }
    }
}

impl MessagePeer for WsPeer {
    fn read_message(&self) -> Result<Inbound> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::PeerClosed);
        }
        // Frames already decoded into tungstenite's buffer do not show up in
        // `peek`, so skip the readiness wait until a read comes back empty.
        if !self.buffered.load(Ordering::Acquire) && !self.wait_readable()? {
            return Ok(Inbound::Idle);
        }

        let mut socket = self.lock();
        self.raw
            .set_nonblocking(true)
            .map_err(Self::read_failure)?;
        let result = socket.read();
        let restored = self.raw.set_nonblocking(false);
        drop(socket);
        restored.map_err(Self::read_failure)?;

        match result {
            Ok(message) => {
                self.buffered.store(true, Ordering::Release);
                match message {
                    Message::Binary(bytes) => Ok(Inbound::Message(bytes.to_vec())),
                    Message::Text(text) => Ok(Inbound::Message(text.as_str().as_bytes().to_vec())),
                    Message::Close(_) => Err(RelayError::PeerClosed),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Inbound::Idle),
                }
            }
            Err(tungstenite::Error::Io(error)) if error.kind() == io::ErrorKind::WouldBlock => {
                self.buffered.store(false, Ordering::Release);
                Ok(Inbound::Idle)
            }
            Err(error) => Err(classify(error, "websocket", false)),
        }
    }

    fn write_message(&self, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::PeerClosed);
        }
        let mut socket = self.lock();
        socket
            .send(Message::binary(payload.to_vec()))
            .map_err(|error| classify(error, "websocket", true))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A writer blocked on a stalled client holds the lock; skip the close
        // frame in that case and go straight to the socket shutdown.
        let socket = match self.socket.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(mut socket) = socket {
            let _ = self.raw.set_write_timeout(Some(Self::CLOSE_WRITE_TIMEOUT));
            let _ = socket.close(None);
            let _ = socket.flush();
            let _ = socket.get_mut().flush();
        }
        let _ = self.raw.shutdown(Shutdown::Both);
    }
}

impl Drop for WsPeer {
    fn drop(&mut self) {
        let _ = self.raw.shutdown(Shutdown::Both);
    }
}
