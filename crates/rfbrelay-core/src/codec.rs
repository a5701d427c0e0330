//! Framed packet codec for recorded sessions.
//!
//! A session file is a bare sequence of packets, each a fixed-size header
//! followed immediately by its payload:
//!
//! ```text
//! +----------+-----------------+--------------+--------------------+
//! | kind (1) | timestamp (8)   | length (8)   | payload (length)   |
//! +----------+-----------------+--------------+--------------------+
//! ```
//!
//! - **kind**: packet discriminator, currently always `0x00` (data).
//! - **timestamp**: little-endian `i64`, wall-clock nanoseconds since the
//!   Unix epoch at the moment the chunk was captured.
//! - **length**: little-endian `i64`, payload byte count, never negative.
//!
//! There is no file header, version tag, trailer, or checksum. A torn write
//! leaves every packet before it readable; decoding stops at the tear.

use std::fmt;
use std::io::{self, Read, Write};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Header size: 1 byte kind + 8 bytes timestamp + 8 bytes length.
pub const HEADER_LEN: usize = 17;

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

/// On-disk packet discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Server-to-client bytes observed on the relay.
    Data = 0x00,
}

impl PacketKind {
    /// Parse a raw byte into a known kind, or `None` for reserved codes.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Data),
            _ => None,
        }
    }

    /// Return the wire byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors produced while decoding a session file.
#[derive(Debug)]
pub enum CodecError {
    /// Zero bytes remained at a packet boundary: the session ended cleanly.
    EndOfStream,
    /// Fewer bytes than required were available for a header or payload.
    Truncated { expected: usize, available: usize },
    /// Unknown or reserved kind byte.
    UnknownKind { byte: u8 },
    /// Header declared a negative payload length.
    NegativeLength { declared: i64 },
    /// Underlying reader failed.
    Io(io::Error),
}

impl CodecError {
    /// `true` for the clean end-of-session condition.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// `true` when the content itself is malformed (as opposed to an I/O failure).
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::UnknownKind { .. } | Self::NegativeLength { .. }
        )
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of session stream"),
            Self::Truncated {
                expected,
                available,
            } => {
                write!(f, "truncated packet: expected {expected} bytes, got {available}")
            }
            Self::UnknownKind { byte } => write!(f, "unknown packet kind: 0x{byte:02X}"),
            Self::NegativeLength { declared } => {
                write!(f, "negative payload length: {declared}")
            }
            Self::Io(error) => write!(f, "session read failed: {error}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// A decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketHeader {
    pub kind: PacketKind,
    /// Capture time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Payload byte count. Always `>= 0` once decoded.
    pub length: i64,
}

impl PacketHeader {
    /// Header for a data chunk of `len` bytes captured at `timestamp`.
    #[must_use]
    pub fn data(timestamp: i64, len: usize) -> Self {
        Self {
            kind: PacketKind::Data,
            timestamp,
            length: i64::try_from(len).unwrap_or(i64::MAX),
        }
    }

    /// Payload length as a `usize`.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::try_from(self.length).unwrap_or(usize::MAX)
    }
}

/// Encode a header into its fixed-size little-endian form.
#[must_use]
pub fn encode_header(header: &PacketHeader) -> [u8; HEADER_LEN] {
    let mut buf = [0_u8; HEADER_LEN];
    buf[0] = header.kind.as_u8();
    buf[1..9].copy_from_slice(&header.timestamp.to_le_bytes());
    buf[9..17].copy_from_slice(&header.length.to_le_bytes());
    buf
}

/// Decode a header from the front of `buf`.
///
/// An empty buffer is [`CodecError::EndOfStream`]; anything shorter than
/// [`HEADER_LEN`] is [`CodecError::Truncated`]. Bytes past the header are
/// ignored.
pub fn decode_header(buf: &[u8]) -> Result<PacketHeader, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::EndOfStream);
    }
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            available: buf.len(),
        });
    }

    let kind = PacketKind::from_u8(buf[0]).ok_or(CodecError::UnknownKind { byte: buf[0] })?;

    let mut word = [0_u8; 8];
    word.copy_from_slice(&buf[1..9]);
    let timestamp = i64::from_le_bytes(word);
    word.copy_from_slice(&buf[9..17]);
    let length = i64::from_le_bytes(word);
    if length < 0 {
        return Err(CodecError::NegativeLength { declared: length });
    }

    Ok(PacketHeader {
        kind,
        timestamp,
        length,
    })
}

// ---------------------------------------------------------------------------
// Streaming helpers
// ---------------------------------------------------------------------------

/// Read and decode the next header from `reader`.
///
/// Distinguishes a clean end (no bytes at the boundary) from a torn header.
pub fn read_header<R: Read>(reader: &mut R) -> Result<PacketHeader, CodecError> {
    let mut buf = [0_u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(CodecError::Io(error)),
        }
    }
    decode_header(&buf[..filled])
}

/// Read exactly the payload announced by `header`.
///
/// Never allocates more than what the reader actually yields, so a corrupt
/// length cannot trigger a huge up-front allocation.
pub fn read_payload<R: Read>(reader: &mut R, header: &PacketHeader) -> Result<Vec<u8>, CodecError> {
    let expected = header.payload_len();
    let mut payload = Vec::new();
    reader
        .take(u64::try_from(header.length).unwrap_or(0))
        .read_to_end(&mut payload)?;
    if payload.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            available: payload.len(),
        });
    }
    Ok(payload)
}

/// Write one packet: header first, then the payload, unbuffered.
pub fn write_packet<W: Write>(writer: &mut W, header: &PacketHeader, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_header(header))?;
    writer.write_all(payload)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Packet reader
// ---------------------------------------------------------------------------

/// One header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// Sequential packet reader over a session stream.
///
/// Iteration yields packets until a clean end of stream (`None`) or the first
/// error (`Some(Err(_))`, after which the reader is exhausted).
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    /// Decode the next packet, reporting [`CodecError::EndOfStream`] at a clean end.
    pub fn next_packet(&mut self) -> Result<Packet, CodecError> {
        let header = read_header(&mut self.inner)?;
        let payload = read_payload(&mut self.inner, &header)?;
        Ok(Packet { header, payload })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for PacketReader<R> {
    type Item = Result<Packet, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_packet() {
            Ok(packet) => Some(Ok(packet)),
            Err(CodecError::EndOfStream) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session statistics
// ---------------------------------------------------------------------------

/// Summary of a session file, produced by walking every packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub packets: u64,
    pub payload_bytes: u64,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    /// Description of the decode failure that stopped the walk, if any.
    pub corruption: Option<String>,
}

impl SessionStats {
    /// Walk `reader` to the end, tolerating a corrupt tail.
    pub fn scan<R: Read>(reader: R) -> Self {
        let mut stats = Self::default();
        for packet in PacketReader::new(reader) {
            match packet {
                Ok(packet) => {
                    stats.packets += 1;
                    stats.payload_bytes = stats
                        .payload_bytes
                        .saturating_add(u64::try_from(packet.payload.len()).unwrap_or(u64::MAX));
                    stats.first_timestamp.get_or_insert(packet.header.timestamp);
                    stats.last_timestamp = Some(packet.header.timestamp);
                }
                Err(error) => stats.corruption = Some(error.to_string()),
            }
        }
        stats
    }

    /// Recorded span between the first and last packet, in nanoseconds.
    #[must_use]
    pub fn duration_nanos(&self) -> i64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corruption.is_none()
    }
}
