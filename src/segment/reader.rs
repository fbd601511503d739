//! Random-access reader over sealed segments, and the forward scan used to
//! recover an unsealed tail.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use parking_lot::Mutex;

use crate::error::{Result, WalError};
use crate::format::{
    decode_index_payload, encoded_frame_size, read_file_header, read_frame_header,
    validate_file_header, verify_payload, FrameHeader, FrameType, FILE_HEADER_LEN,
    FRAME_HEADER_LEN,
};
use crate::format::frame::payload_crc;
use crate::types::{LogEntry, SegmentInfo};

/// Reader over one sealed segment.
///
/// The offset table is loaded once from the index frame on open; after that
/// the reader never mutates segment state and is safe to share across
/// threads. Reads on the same segment serialize on the file handle.
pub struct SegmentReader {
    info: SegmentInfo,
    file: Mutex<File>,
    offsets: Vec<u32>,
}

impl SegmentReader {
    /// Open a sealed segment: verify the file header against the catalog's
    /// `SegmentInfo`, load the index frame, and confirm the commit frame.
    pub(crate) fn open(mut file: File, info: SegmentInfo) -> Result<Self> {
        let mut hdr = [0u8; FILE_HEADER_LEN];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut hdr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                WalError::Corrupt(format!("segment {} shorter than its file header", info.id))
            } else {
                WalError::Io(e)
            }
        })?;
        validate_file_header(read_file_header(&hdr)?, &info)?;

        if !info.is_sealed() {
            return Err(WalError::Corrupt(format!(
                "segment {} opened as sealed but catalog marks it unsealed",
                info.id
            )));
        }

        let (index_header, index_payload) = read_frame_at(&mut file, info.index_start)?;
        if index_header.typ != FrameType::Index {
            return Err(WalError::Corrupt(format!(
                "segment {}: expected index frame at offset {}, found {:?}",
                info.id, info.index_start, index_header.typ
            )));
        }
        verify_payload(&index_header, &index_payload)?;
        let offsets = decode_index_payload(&index_payload)?;

        let commit_offset = info.index_start + encoded_frame_size(index_header.len as usize) as u64;
        let (commit_header, _) = read_frame_at(&mut file, commit_offset)?;
        if commit_header.typ != FrameType::Commit {
            return Err(WalError::Corrupt(format!(
                "segment {} is missing its commit frame",
                info.id
            )));
        }

        let expected = info.max_index - info.base_index + 1;
        if offsets.len() as u64 != expected {
            return Err(WalError::Corrupt(format!(
                "segment {}: index frame has {} offsets, catalog range [{}, {}] needs {}",
                info.id,
                offsets.len(),
                info.base_index,
                info.max_index,
                expected
            )));
        }

        Ok(SegmentReader {
            info,
            file: Mutex::new(file),
            offsets,
        })
    }

    /// Read one entry by index. `NotFound` outside `[min_index, max_index]`.
    pub fn get_log(&self, index: u64) -> Result<LogEntry> {
        if index < self.info.min_index || index > self.info.max_index {
            return Err(WalError::NotFound);
        }
        let offset = self.offsets[(index - self.info.base_index) as usize] as u64;

        let mut file = self.file.lock();
        let (header, payload) = read_frame_at(&mut file, offset)?;
        drop(file);

        if header.typ != FrameType::Entry {
            return Err(WalError::Corrupt(format!(
                "segment {}: expected entry frame for index {} at offset {}, found {:?}",
                self.info.id, index, offset, header.typ
            )));
        }
        verify_payload(&header, &payload)?;
        Ok(LogEntry::new(index, payload))
    }

    /// Catalog metadata this reader was opened with.
    pub fn info(&self) -> SegmentInfo {
        self.info
    }
}

/// Read one frame (header + payload, padding skipped) at `offset`.
///
/// The caller decides what frame type it expected and whether to verify the
/// payload checksum.
pub(crate) fn read_frame_at(file: &mut File, offset: u64) -> Result<(FrameHeader, Vec<u8>)> {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut hdr).map_err(map_frame_eof)?;
    let header = read_frame_header(&hdr)?;

    let mut payload = vec![0u8; header.len as usize];
    file.read_exact(&mut payload).map_err(map_frame_eof)?;
    Ok((header, payload))
}

fn map_frame_eof(e: std::io::Error) -> WalError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WalError::Corrupt("frame extends past end of segment file".to_string())
    } else {
        WalError::Io(e)
    }
}

/// Result of scanning a segment body for entry frames.
#[derive(Debug)]
pub(crate) struct ScanResult {
    /// Byte offset of each valid entry frame, in order.
    pub offsets: Vec<u32>,
    /// Byte offset just past the last valid entry frame.
    pub end_offset: u64,
}

/// Scan entry frames forward from the end of the file header.
///
/// Accepts only well-formed entry frames whose payload fits inside the file
/// and whose checksum matches; stops at the first anything-else (zeroed
/// region, index frame, torn frame). For a tail recovered after a crash the
/// stop point discards whatever tail of a batch was not durable.
pub(crate) fn scan_entry_frames(file: &mut File, file_len: u64) -> Result<ScanResult> {
    file.seek(SeekFrom::Start(FILE_HEADER_LEN as u64))?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);

    let mut offsets = Vec::new();
    let mut offset = FILE_HEADER_LEN as u64;
    let mut hdr = [0u8; FRAME_HEADER_LEN];

    loop {
        if offset + FRAME_HEADER_LEN as u64 > file_len {
            break;
        }
        if reader.read_exact(&mut hdr).is_err() {
            break;
        }
        let header = match read_frame_header(&hdr) {
            Ok(h) => h,
            Err(_) => break,
        };
        if header.typ != FrameType::Entry {
            break;
        }
        let total = encoded_frame_size(header.len as usize) as u64;
        if offset + total > file_len {
            break;
        }

        // Payload and padding together keep the stream aligned.
        let mut body = vec![0u8; (total as usize) - FRAME_HEADER_LEN];
        if reader.read_exact(&mut body).is_err() {
            break;
        }
        if payload_crc(&body[..header.len as usize]) != header.crc {
            break;
        }

        offsets.push(offset as u32);
        offset += total;
    }

    Ok(ScanResult {
        offsets,
        end_offset: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{write_file_header, write_frame};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_segment_body(entries: &[&[u8]]) -> (Vec<u8>, Vec<u32>) {
        let info = SegmentInfo::new_tail(1, 1, 4096);
        let mut raw = vec![0u8; FILE_HEADER_LEN];
        write_file_header(&mut raw, &info).unwrap();

        let mut offsets = Vec::new();
        for payload in entries {
            offsets.push(raw.len() as u32);
            let mut frame = vec![0u8; encoded_frame_size(payload.len())];
            write_frame(&mut frame, FrameType::Entry, payload).unwrap();
            raw.extend_from_slice(&frame);
        }
        (raw, offsets)
    }

    fn to_file(dir: &std::path::Path, raw: &[u8]) -> File {
        let path = dir.join("seg");
        let mut f = File::create(&path).unwrap();
        f.write_all(raw).unwrap();
        File::options().read(true).open(&path).unwrap()
    }

    #[test]
    fn test_scan_finds_all_entries() {
        let (raw, offsets) = write_segment_body(&[b"a", b"bb", b"ccc"]);
        let dir = tempdir().unwrap();
        let mut file = to_file(dir.path(), &raw);

        let scan = scan_entry_frames(&mut file, raw.len() as u64).unwrap();
        assert_eq!(scan.offsets, offsets);
        assert_eq!(scan.end_offset, raw.len() as u64);
    }

    #[test]
    fn test_scan_stops_at_zero_header() {
        let (mut raw, offsets) = write_segment_body(&[b"a", b"bb"]);
        let end = raw.len() as u64;
        // Preallocated zero region after the last entry.
        raw.extend_from_slice(&[0u8; 256]);

        let dir = tempdir().unwrap();
        let mut file = to_file(dir.path(), &raw);

        let scan = scan_entry_frames(&mut file, raw.len() as u64).unwrap();
        assert_eq!(scan.offsets, offsets);
        assert_eq!(scan.end_offset, end);
    }

    #[test]
    fn test_scan_discards_torn_frame() {
        let (mut raw, offsets) = write_segment_body(&[b"a", b"bb"]);
        let end = raw.len() as u64;

        // A header claiming a payload that was never written: the zeroed
        // payload region fails the checksum.
        let mut torn = [0u8; FRAME_HEADER_LEN];
        torn[0] = FrameType::Entry as u8;
        torn[1] = 0x5A;
        torn[4..8].copy_from_slice(&16u32.to_le_bytes());
        raw.extend_from_slice(&torn);
        raw.extend_from_slice(&[0u8; 64]);

        let dir = tempdir().unwrap();
        let mut file = to_file(dir.path(), &raw);

        let scan = scan_entry_frames(&mut file, raw.len() as u64).unwrap();
        assert_eq!(scan.offsets, offsets);
        assert_eq!(scan.end_offset, end);
    }

    #[test]
    fn test_scan_discards_frame_past_file_end() {
        let (mut raw, offsets) = write_segment_body(&[b"a"]);
        let end = raw.len() as u64;

        // Header whose payload length runs past EOF: torn mid-frame.
        let mut torn = [0u8; FRAME_HEADER_LEN];
        torn[0] = FrameType::Entry as u8;
        torn[4..8].copy_from_slice(&4096u32.to_le_bytes());
        raw.extend_from_slice(&torn);

        let dir = tempdir().unwrap();
        let mut file = to_file(dir.path(), &raw);

        let scan = scan_entry_frames(&mut file, raw.len() as u64).unwrap();
        assert_eq!(scan.offsets, offsets);
        assert_eq!(scan.end_offset, end);
    }

    #[test]
    fn test_scan_empty_body() {
        let (mut raw, _) = write_segment_body(&[]);
        raw.extend_from_slice(&[0u8; 128]);

        let dir = tempdir().unwrap();
        let mut file = to_file(dir.path(), &raw);

        let scan = scan_entry_frames(&mut file, raw.len() as u64).unwrap();
        assert!(scan.offsets.is_empty());
        assert_eq!(scan.end_offset, FILE_HEADER_LEN as u64);
    }
}
