//! Segment file header.
//!
//! ```text
//! bytes 0..4   : magic "SWAL"
//! bytes 4..8   : format version (LE u32)
//! bytes 8..16  : base_index (LE u64)
//! bytes 16..24 : id (LE u64)
//! bytes 24..32 : reserved, zero
//! ```

use crate::error::{Result, WalError};
use crate::types::SegmentInfo;

/// Magic bytes identifying a segment file.
pub(crate) const SEGMENT_MAGIC: [u8; 4] = *b"SWAL";

/// Current segment format version.
pub(crate) const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Fixed size of the file header in bytes.
pub(crate) const FILE_HEADER_LEN: usize = 32;

/// Identity fields decoded from a segment file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub base_index: u64,
    pub id: u64,
}

/// Encode the file header for `info` into `buf`.
pub(crate) fn write_file_header(buf: &mut [u8], info: &SegmentInfo) -> Result<()> {
    if buf.len() < FILE_HEADER_LEN {
        return Err(WalError::ShortBuffer {
            needed: FILE_HEADER_LEN,
            have: buf.len(),
        });
    }
    buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
    buf[4..8].copy_from_slice(&SEGMENT_FORMAT_VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&info.base_index.to_le_bytes());
    buf[16..24].copy_from_slice(&info.id.to_le_bytes());
    for b in &mut buf[24..FILE_HEADER_LEN] {
        *b = 0;
    }
    Ok(())
}

/// Decode a file header, checking magic and version.
pub(crate) fn read_file_header(buf: &[u8]) -> Result<FileHeader> {
    if buf.len() < FILE_HEADER_LEN {
        return Err(WalError::ShortBuffer {
            needed: FILE_HEADER_LEN,
            have: buf.len(),
        });
    }
    if buf[0..4] != SEGMENT_MAGIC {
        return Err(WalError::Corrupt("bad segment magic bytes".to_string()));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().expect("slice length checked"));
    if version != SEGMENT_FORMAT_VERSION {
        return Err(WalError::Corrupt(format!(
            "unsupported segment format version {version}"
        )));
    }
    Ok(FileHeader {
        base_index: u64::from_le_bytes(buf[8..16].try_into().expect("slice length checked")),
        id: u64::from_le_bytes(buf[16..24].try_into().expect("slice length checked")),
    })
}

/// Check a decoded header against the catalog's idea of the segment.
///
/// A mismatch means the file was swapped or renamed out from under us.
pub(crate) fn validate_file_header(got: FileHeader, expected: &SegmentInfo) -> Result<()> {
    if got.base_index != expected.base_index || got.id != expected.id {
        return Err(WalError::Corrupt(format!(
            "segment file identity mismatch: header has base_index={} id={}, \
             catalog has base_index={} id={}",
            got.base_index, got.id, expected.base_index, expected.id
        )));
    }
    Ok(())
}
