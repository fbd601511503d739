//! Frame codec.
//!
//! Every record in a segment file is a frame: an 8-byte header followed by
//! the payload and zero padding up to the next 8-byte boundary.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────┬─────────────────┬──────────────────┬─────────────────────┐
//! │ type (1) │ payload crc (3) │ length (4, LE)   │ payload + padding   │
//! └──────────┴─────────────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! The crc bytes carry the low 24 bits of a CRC32 over the payload. Padding
//! bytes are written as zero and never interpreted as data.

use crate::error::{Result, WalError};

/// Size of a frame header in bytes. Also the alignment unit for frames.
pub(crate) const FRAME_HEADER_LEN: usize = 8;

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FrameType {
    /// Zeroed or padding region; never valid as a record.
    None = 0,
    /// One log entry's payload bytes.
    Entry = 1,
    /// Dense offset table, written once at seal time.
    Index = 2,
    /// Zero-length marker terminating a sealed file.
    Commit = 3,
}

impl FrameType {
    pub(crate) fn from_byte(b: u8) -> Option<FrameType> {
        match b {
            0 => Some(FrameType::None),
            1 => Some(FrameType::Entry),
            2 => Some(FrameType::Index),
            3 => Some(FrameType::Commit),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub typ: FrameType,
    /// Payload length in bytes, excluding header and padding.
    pub len: u32,
    /// Low 24 bits of the payload CRC32.
    pub crc: u32,
}

/// Padding bytes required after a payload of `len` bytes so the next frame
/// header starts on an 8-byte boundary.
pub(crate) fn pad_len(len: usize) -> usize {
    (FRAME_HEADER_LEN - len % FRAME_HEADER_LEN) % FRAME_HEADER_LEN
}

/// Total encoded size of a frame with a payload of `len` bytes.
pub(crate) fn encoded_frame_size(len: usize) -> usize {
    FRAME_HEADER_LEN + len + pad_len(len)
}

/// Low 24 bits of the CRC32 over `payload`.
pub(crate) fn payload_crc(payload: &[u8]) -> u32 {
    crc32fast::hash(payload) & 0x00FF_FFFF
}

/// Encode one frame into `buf`. Returns the encoded size.
pub(crate) fn write_frame(buf: &mut [u8], typ: FrameType, payload: &[u8]) -> Result<usize> {
    let total = encoded_frame_size(payload.len());
    if buf.len() < total {
        return Err(WalError::ShortBuffer {
            needed: total,
            have: buf.len(),
        });
    }

    let crc = payload_crc(payload);
    buf[0] = typ as u8;
    buf[1..4].copy_from_slice(&crc.to_le_bytes()[..3]);
    buf[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload.len()].copy_from_slice(payload);
    for b in &mut buf[FRAME_HEADER_LEN + payload.len()..total] {
        *b = 0;
    }
    Ok(total)
}

/// Decode a frame header from the start of `buf`.
///
/// An unknown type tag is `Corrupt`; callers scanning a tail treat that as
/// the end of valid data instead.
pub(crate) fn read_frame_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(WalError::ShortBuffer {
            needed: FRAME_HEADER_LEN,
            have: buf.len(),
        });
    }
    let typ = FrameType::from_byte(buf[0])
        .ok_or_else(|| WalError::Corrupt(format!("unknown frame type tag {:#04x}", buf[0])))?;
    let mut crc_bytes = [0u8; 4];
    crc_bytes[..3].copy_from_slice(&buf[1..4]);
    Ok(FrameHeader {
        typ,
        len: u32::from_le_bytes(buf[4..8].try_into().expect("slice length checked")),
        crc: u32::from_le_bytes(crc_bytes),
    })
}

/// Verify a payload against the checksum recorded in its frame header.
pub(crate) fn verify_payload(header: &FrameHeader, payload: &[u8]) -> Result<()> {
    let computed = payload_crc(payload);
    if computed != header.crc {
        return Err(WalError::Corrupt(format!(
            "frame checksum mismatch: stored {:#08x}, computed {:#08x}",
            header.crc, computed
        )));
    }
    Ok(())
}

/// Encode the seal-time index frame: a dense little-endian `u32` offset per
/// entry, each pointing at that entry's frame header.
pub(crate) fn write_index_frame(buf: &mut [u8], offsets: &[u32]) -> Result<usize> {
    let mut payload = Vec::with_capacity(offsets.len() * 4);
    for off in offsets {
        payload.extend_from_slice(&off.to_le_bytes());
    }
    write_frame(buf, FrameType::Index, &payload)
}

/// Decode an index frame payload back into the offset table.
pub(crate) fn decode_index_payload(payload: &[u8]) -> Result<Vec<u32>> {
    if payload.len() % 4 != 0 {
        return Err(WalError::Corrupt(format!(
            "index frame payload length {} is not a multiple of 4",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().expect("chunk is 4 bytes")))
        .collect())
}

/// Encode the zero-length commit frame terminating a sealed file.
pub(crate) fn write_commit_frame(buf: &mut [u8]) -> Result<usize> {
    write_frame(buf, FrameType::Commit, &[])
}
