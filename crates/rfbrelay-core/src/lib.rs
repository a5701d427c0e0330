#![forbid(unsafe_code)]

//! rfbrelay core
//!
//! Byte relay between a browser-side WebSocket and a raw RFB (VNC) server,
//! with optional recording of the server's stream and paced replay.
//!
//! # Key Components
//!
//! - [`Bridge`] - Duplex relay between a [`MessagePeer`] and an [`Upstream`]
//! - [`SessionRecorder`] - Appends server-to-client chunks to a session file
//! - [`play`] - Replays a session file at its recorded pace
//! - [`codec`] - The fixed 17-byte packet header of session files
//! - [`SessionStore`] - Validated, create-once session files under one root
//!
//! # Sessions
//! Every bridge or playback session owns its tasks in a scoped thread group.
//! The first task to exit trips a shared [`DoneSignal`]; the session closes
//! its endpoints, which unblocks the other tasks, and returns only after all
//! of them have been joined.

pub mod bridge;
pub mod cancel;
pub mod clock;
pub mod codec;
pub mod error;
pub mod memory;
pub mod peer;
pub mod player;
pub mod recorder;
pub mod service;
pub mod store;
mod tasks;
pub mod upstream;

pub use bridge::{Bridge, BridgeConfig, BridgeSummary};
pub use cancel::DoneSignal;
pub use codec::{CodecError, HEADER_LEN, Packet, PacketHeader, PacketKind, PacketReader, SessionStats};
pub use error::{RelayError, Result};
pub use memory::{MemoryClient, MemoryPeer, memory_pair};
pub use peer::{Inbound, MessagePeer, WsPeer};
pub use player::{PlaybackSummary, PlayerConfig, play};
pub use recorder::{OverflowPolicy, RecordSummary, RecorderConfig, SessionRecorder};
pub use service::{bridge_live, bridge_process, bridge_recorded, replay};
pub use store::{SessionStore, allocate_id, validate_session_id};
pub use upstream::{Closer, Upstream};
