//! The `Frame` type and its wire encoding.

use std::convert::TryFrom;
use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use super::crc::crc8;

/// Id of the host (this program) on the link. Never a valid board id.
pub const HOST_ID: u8 = 0;

/// Size of the fixed frame header: source id, destination id, type and the
/// 16-bit payload length.
pub const HEADER_LEN: usize = 5;

/// Size of the checksum trailer.
pub const TRAILER_LEN: usize = 1;

/// Largest payload a board accepts in one frame.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024;

/// Frame types understood on the link. The numeric values are shared with the
/// board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Nack = 0,
    Ack = 1,
    FatalError = 2,
    IdRequest = 3,
    IdResponse = 4,
    CliData = 5,
    ProgramUpdateRequest = 6,
    ProgramData = 7,
    ProgramUpdateFinished = 8,
    EepromDataRead = 9,
    EepromDataWrite = 10,
}

/// Reasons for which raw bytes are not a [`Frame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated to {0} bytes")]
    Truncated(usize),
    #[error("unknown frame type {0}")]
    UnknownType(u8),
    #[error("payload of {0} bytes exceeds the maximum frame size")]
    Oversized(usize),
    #[error("frame is {actual} bytes long but its header announces {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { expected: u8, actual: u8 },
}

/// One unit of communication on the link.
///
/// A frame is immutable once built; the length on the wire is derived from
/// the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    source_id: u8,
    dest_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame.
    ///
    /// # Panics
    ///
    /// When `payload` is longer than [`MAX_PAYLOAD_LEN`].
    pub fn new(frame_type: FrameType, source_id: u8, dest_id: u8, payload: Vec<u8>) -> Self {
        assert!(
            payload.len() <= MAX_PAYLOAD_LEN,
            "frame payload of {} bytes is too large",
            payload.len()
        );
        Frame {
            frame_type,
            source_id,
            dest_id,
            payload,
        }
    }

    /// Build a frame with no payload, such as `Ack` or `Nack`.
    pub fn empty(frame_type: FrameType, source_id: u8, dest_id: u8) -> Self {
        Self::new(frame_type, source_id, dest_id, Vec::new())
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn dest_id(&self) -> u8 {
        self.dest_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total number of bytes of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + TRAILER_LEN
    }

    /// Serialize the frame into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.encoded_len());
        raw.push(self.source_id);
        raw.push(self.dest_id);
        raw.push(self.frame_type.into());
        raw.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        raw.extend_from_slice(&self.payload);
        raw.push(crc8(&raw));
        raw
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("type", &self.frame_type)
            .field("source", &self.source_id)
            .field("dest", &self.dest_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Number of bytes still to be read after the `header` to complete the frame,
/// or `None` if the header cannot start a valid frame.
pub fn decode_length(header: &[u8]) -> Option<usize> {
    if header.len() < HEADER_LEN {
        return None;
    }
    FrameType::try_from(header[2]).ok()?;
    let payload_len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return None;
    }
    Some(payload_len + TRAILER_LEN)
}

/// Parse one complete raw frame.
pub fn decode(raw: &[u8]) -> Result<Frame, DecodeError> {
    if raw.len() < HEADER_LEN + TRAILER_LEN {
        return Err(DecodeError::Truncated(raw.len()));
    }
    let frame_type =
        FrameType::try_from(raw[2]).map_err(|_| DecodeError::UnknownType(raw[2]))?;
    let payload_len = u16::from_be_bytes([raw[3], raw[4]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::Oversized(payload_len));
    }
    let expected = HEADER_LEN + payload_len + TRAILER_LEN;
    if raw.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: raw.len(),
        });
    }

    let (body, trailer) = raw.split_at(expected - TRAILER_LEN);
    let checksum = crc8(body);
    if checksum != trailer[0] {
        return Err(DecodeError::Checksum {
            expected: checksum,
            actual: trailer[0],
        });
    }

    Ok(Frame {
        frame_type,
        source_id: raw[0],
        dest_id: raw[1],
        payload: body[HEADER_LEN..].to_vec(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
