//! Frame codec
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────────┬─────────────┐
//! │Marker (1)│ MsgLen (4)   │ ValueLen (4) │ Message       │ Value       │
//! │  'F'     │ uint32 BE    │ uint32 BE    │ MsgLen bytes  │ ValueLen    │
//! └──────────┴──────────────┴──────────────┴───────────────┴─────────────┘
//! ```
//!
//! The header is read in full before anything else, and both declared
//! lengths are checked against the [`FrameFormat`] maxima before a single
//! body byte is buffered.

use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::config::FrameFormat;
use crate::error::{KineticError, Result};

/// Header size: 1 byte marker + 4 bytes message length + 4 bytes value length
pub const HEADER_SIZE: usize = 9;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub marker: u8,
    pub message_len: u32,
    pub value_len: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.marker;
        bytes[1..5].copy_from_slice(&self.message_len.to_be_bytes());
        bytes[5..9].copy_from_slice(&self.value_len.to_be_bytes());
        bytes
    }

    /// Parse and validate a header against `format`
    pub fn parse(bytes: &[u8; HEADER_SIZE], format: &FrameFormat) -> Result<Self> {
        let header = Self {
            marker: bytes[0],
            message_len: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            value_len: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        };
        header.validate(format)?;
        Ok(header)
    }

    fn validate(&self, format: &FrameFormat) -> Result<()> {
        if self.marker != format.marker {
            return Err(KineticError::Framing(format!(
                "Bad frame marker: 0x{:02x} (expected 0x{:02x})",
                self.marker, format.marker
            )));
        }
        if self.message_len > format.max_message_len {
            return Err(KineticError::Framing(format!(
                "Message too large: {} bytes (max {})",
                self.message_len, format.max_message_len
            )));
        }
        if self.value_len > format.max_value_len {
            return Err(KineticError::Framing(format!(
                "Value too large: {} bytes (max {})",
                self.value_len, format.max_value_len
            )));
        }
        Ok(())
    }

    /// Total frame length including the header
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.message_len as usize + self.value_len as usize
    }
}

/// One complete wire unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Serialized message
    pub message: Bytes,

    /// Raw value bytes
    pub value: Bytes,
}

impl Frame {
    pub fn new(message: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
            value: value.into(),
        }
    }

    /// Header describing this frame
    pub fn header(&self, format: &FrameFormat) -> Result<FrameHeader> {
        let header = FrameHeader {
            marker: format.marker,
            message_len: wire_len(self.message.len())?,
            value_len: wire_len(self.value.len())?,
        };
        header.validate(format)?;
        Ok(header)
    }

    /// Encode header + message + value
    pub fn encode(&self, format: &FrameFormat) -> Result<Bytes> {
        let header = self.header(format)?;
        let mut buffer = ByteBuffer::with_capacity(header.frame_len());
        buffer
            .append(&header.to_bytes())?
            .append(&self.message)?
            .append(&self.value)?;
        Ok(buffer.freeze())
    }

    /// Decode a frame from a complete byte slice
    ///
    /// The slice must contain exactly one frame.
    pub fn decode(bytes: &[u8], format: &FrameFormat) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KineticError::Framing(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = FrameHeader::parse(&raw, format)?;

        if bytes.len() != header.frame_len() {
            return Err(KineticError::Framing(format!(
                "Frame length mismatch: header declares {} bytes, got {}",
                header.frame_len(),
                bytes.len()
            )));
        }

        let message_end = HEADER_SIZE + header.message_len as usize;
        Ok(Self {
            message: Bytes::copy_from_slice(&bytes[HEADER_SIZE..message_end]),
            value: Bytes::copy_from_slice(&bytes[message_end..]),
        })
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs. A peer
/// closing the stream exactly between frames yields `ConnectionClosed`;
/// closing it mid-frame is a framing error.
pub fn read_frame<R: Read>(reader: &mut R, format: &FrameFormat) -> Result<Frame> {
    let mut raw = [0u8; HEADER_SIZE];
    read_header(reader, &mut raw)?;
    let header = FrameHeader::parse(&raw, format)?;

    let message = read_section(reader, header.message_len as usize, "message")?;
    let value = read_section(reader, header.value_len as usize, "value")?;

    Ok(Frame { message, value })
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame, format: &FrameFormat) -> Result<()> {
    let bytes = frame.encode(format)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R, raw: &mut [u8; HEADER_SIZE]) -> Result<()> {
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Err(KineticError::ConnectionClosed),
            Ok(0) => {
                return Err(KineticError::Framing(format!(
                    "Connection closed inside header ({} of {} bytes)",
                    filled, HEADER_SIZE
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn read_section<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Bytes> {
    if len == 0 {
        return Ok(Bytes::new());
    }

    // len was bounded by the header check, so this allocation is too
    let mut buf = Vec::with_capacity(len);
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;

    if buf.len() != len {
        return Err(KineticError::Framing(format!(
            "Connection closed inside {} ({} of {} bytes)",
            what,
            buf.len(),
            len
        )));
    }
    Ok(Bytes::from(buf))
}

fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| KineticError::Framing(format!("Section too large for header: {} bytes", len)))
}
