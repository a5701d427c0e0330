use std::io;

use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure of one session task or of session setup.
///
/// Every variant is local to a single session: it is logged by the session
/// owner and never affects other sessions.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Either endpoint ended the session.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Dial, file create/open, or process spawn failed before relaying started.
    #[error("{resource} unavailable: {source}")]
    ResourceUnavailable {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("write to {target} failed: {source}")]
    WriteFailure {
        target: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("read from {target} failed: {source}")]
    ReadFailure {
        target: &'static str,
        #[source]
        source: io::Error,
    },

    /// Malformed session file content.
    #[error("session file: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid session id {id:?}: {reason}")]
    InvalidSessionId { id: String, reason: &'static str },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// `true` for endings that are a normal part of a session's life.
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::PeerClosed => true,
            Self::WebSocket(error) => matches!(
                error,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(
                        tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
                    )
            ),
            Self::Codec(error) => error.is_end_of_stream(),
            _ => false,
        }
    }

    pub fn unavailable(resource: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            source,
        }
    }
}
