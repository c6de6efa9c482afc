//! Transport framing (length + channel + seek delta + crc32c).
//!
//! Every frame is a 16-byte little-endian header followed by the payload.
//! A channel of [`CONTROL_CHANNEL`] marks a tagged control packet; any other
//! channel carries a raw memory block for that stream.

use bytes::{Bytes, BytesMut};
use crc32c::crc32c;
use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 16;

/// Channel id reserved for control packets.
pub const CONTROL_CHANNEL: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame length invalid: {reason}")]
    FrameLengthInvalid { reason: String },
    #[error("frame too large: max {max_frame_bytes} got {got_bytes}")]
    FrameTooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },
    #[error("frame crc mismatch: expected {expected} got {got}")]
    FrameCrcMismatch { expected: u32, got: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub channel: u32,
    pub delta: i32,
    pub crc: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            channel: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            delta: i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            crc: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.channel.to_le_bytes());
        out[8..12].copy_from_slice(&self.delta.to_le_bytes());
        out[12..16].copy_from_slice(&self.crc.to_le_bytes());
        out
    }
}

/// Encode one complete frame (header + payload) into a contiguous buffer.
pub fn encode_frame(
    channel: u32,
    delta: i32,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<Bytes, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::FrameLengthInvalid {
            reason: "frame length cannot be zero".to_string(),
        });
    }
    if payload.len() > max_frame_bytes {
        return Err(FrameError::FrameTooLarge {
            max_frame_bytes,
            got_bytes: payload.len(),
        });
    }
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::FrameLengthInvalid {
        reason: "frame length exceeds u32".to_string(),
    })?;
    let header = FrameHeader {
        length,
        channel,
        delta,
        crc: crc32c(payload),
    };

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Incremental frame decoder over an append-only byte buffer.
///
/// Feed raw socket reads with [`extend`](FrameDecoder::extend), then drain
/// complete frames with [`next_frame`](FrameDecoder::next_frame).
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True if a partially received frame is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn next_frame(&mut self) -> Result<Option<(FrameHeader, Bytes)>, FrameError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_LEN];
        raw.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let header = FrameHeader::parse(&raw);

        let length = header.length as usize;
        if length == 0 {
            return Err(FrameError::FrameLengthInvalid {
                reason: "frame length cannot be zero".to_string(),
            });
        }
        if length > self.max_frame_bytes {
            return Err(FrameError::FrameTooLarge {
                max_frame_bytes: self.max_frame_bytes,
                got_bytes: length,
            });
        }

        if self.buf.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }

        let _ = self.buf.split_to(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(length).freeze();

        let actual_crc = crc32c(&payload);
        if actual_crc != header.crc {
            return Err(FrameError::FrameCrcMismatch {
                expected: header.crc,
                got: actual_crc,
            });
        }

        Ok(Some((header, payload)))
    }
}
