//! Single-writer append path for the tail segment.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, WalError};
use crate::format::{
    encoded_frame_size, verify_payload, write_commit_frame, write_frame, write_index_frame,
    FrameType, FILE_HEADER_LEN, FRAME_HEADER_LEN,
};
use crate::segment::reader::{read_frame_at, ScanResult};
use crate::types::{unix_micros, LogEntry, SegmentInfo};

/// Tail state shared between the writer and concurrent readers.
///
/// The offset table is only ever extended, and only after the bytes it
/// points at are durable, so a reader holding this handle can never observe
/// an offset for a non-durable entry.
pub(crate) struct TailShared {
    base_index: u64,
    file: Mutex<File>,
    offsets: RwLock<Vec<u32>>,
}

impl TailShared {
    /// Number of entries readable from the tail.
    pub(crate) fn count(&self) -> usize {
        self.offsets.read().len()
    }

    pub(crate) fn base_index(&self) -> u64 {
        self.base_index
    }

    /// Index of the last entry, or 0 when the tail is empty.
    pub(crate) fn last_index(&self) -> u64 {
        let count = self.count() as u64;
        if count == 0 {
            0
        } else {
            self.base_index + count - 1
        }
    }

    /// Read one entry by index. `NotFound` outside the written range.
    pub(crate) fn get_log(&self, index: u64) -> Result<LogEntry> {
        let offset = {
            let offsets = self.offsets.read();
            if index < self.base_index {
                return Err(WalError::NotFound);
            }
            let i = (index - self.base_index) as usize;
            match offsets.get(i) {
                Some(off) => *off as u64,
                None => return Err(WalError::NotFound),
            }
        };

        let (header, payload) = {
            let mut file = self.file.lock();
            read_frame_at(&mut file, offset)?
        };
        if header.typ != FrameType::Entry {
            return Err(WalError::Corrupt(format!(
                "tail segment: expected entry frame for index {index} at offset {offset}, \
                 found {:?}",
                header.typ
            )));
        }
        verify_payload(&header, &payload)?;
        Ok(LogEntry::new(index, payload))
    }
}

/// Append-side handle for the one unsealed tail segment.
///
/// Appends go batch-at-a-time: frames are written from the current cursor,
/// the file is fsynced, and only then does the in-memory offset table grow.
/// After [`SegmentWriter::seal`] the writer rejects further appends.
pub struct SegmentWriter {
    info: SegmentInfo,
    shared: Arc<TailShared>,
    write_offset: u64,
    sealed: bool,
}

impl SegmentWriter {
    /// Wrap a freshly created segment file. The filer has already written
    /// and synced the file header.
    pub(crate) fn create(file: File, info: SegmentInfo) -> Self {
        SegmentWriter {
            shared: Arc::new(TailShared {
                base_index: info.base_index,
                file: Mutex::new(file),
                offsets: RwLock::new(Vec::new()),
            }),
            info,
            write_offset: FILE_HEADER_LEN as u64,
            sealed: false,
        }
    }

    /// Wrap a tail recovered by scanning its entry frames.
    pub(crate) fn recover(file: File, info: SegmentInfo, scan: ScanResult) -> Self {
        SegmentWriter {
            shared: Arc::new(TailShared {
                base_index: info.base_index,
                file: Mutex::new(file),
                offsets: RwLock::new(scan.offsets),
            }),
            info,
            write_offset: scan.end_offset,
            sealed: false,
        }
    }

    /// Append a batch of contiguous entries.
    ///
    /// The first entry's index must be exactly `base_index + entry count`;
    /// anything else is `OutOfOrder`. The batch becomes durable (fdatasync)
    /// before the offsets are published, so a success here means every
    /// entry in the batch is readable and crash-safe.
    pub(crate) fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        if self.sealed {
            return Err(WalError::Sealed);
        }
        if entries.is_empty() {
            return Ok(());
        }

        let expected = self.info.base_index + self.shared.count() as u64;
        for (i, entry) in entries.iter().enumerate() {
            let want = expected + i as u64;
            if entry.index != want {
                return Err(WalError::OutOfOrder {
                    expected: want,
                    got: entry.index,
                });
            }
        }

        let total: u64 = entries
            .iter()
            .map(|e| encoded_frame_size(e.data.len()) as u64)
            .sum();
        // Offsets are u32; a segment body may not grow past that.
        if self.write_offset + total > u32::MAX as u64 {
            return Err(WalError::Full);
        }

        let mut buf = vec![0u8; total as usize];
        let mut new_offsets = Vec::with_capacity(entries.len());
        let mut pos = 0usize;
        for entry in entries {
            new_offsets.push((self.write_offset + pos as u64) as u32);
            pos += write_frame(&mut buf[pos..], FrameType::Entry, &entry.data)?;
        }

        {
            let mut file = self.shared.file.lock();
            file.seek(SeekFrom::Start(self.write_offset))?;
            file.write_all(&buf)?;
            file.sync_data()?;
        }

        // Durable now; safe to publish.
        self.shared.offsets.write().extend_from_slice(&new_offsets);
        self.write_offset += total;
        Ok(())
    }

    /// Write the index and commit frames, fsync, and return the updated
    /// `SegmentInfo`. The writer is closed to appends afterwards.
    pub(crate) fn seal(&mut self) -> Result<SegmentInfo> {
        if self.sealed {
            return Err(WalError::Sealed);
        }
        let offsets = self.shared.offsets.read().clone();
        debug_assert!(!offsets.is_empty(), "sealing an empty segment");

        let index_start = self.write_offset;
        let index_size = encoded_frame_size(offsets.len() * 4);
        let mut buf = vec![0u8; index_size + FRAME_HEADER_LEN];
        write_index_frame(&mut buf[..index_size], &offsets)?;
        write_commit_frame(&mut buf[index_size..])?;

        {
            let mut file = self.shared.file.lock();
            file.seek(SeekFrom::Start(index_start))?;
            file.write_all(&buf)?;
            // The index may land past the preallocated region, so the file
            // length must be durable too.
            file.sync_all()?;
        }

        self.write_offset = index_start + buf.len() as u64;
        self.sealed = true;

        self.info.max_index = self.info.base_index + offsets.len() as u64 - 1;
        self.info.index_start = index_start;
        self.info.seal_time = unix_micros();
        Ok(self.info)
    }

    /// Fsync any written data.
    pub(crate) fn sync(&self) -> Result<()> {
        self.shared.file.lock().sync_data()?;
        Ok(())
    }

    /// Byte offset of the entry frame for `index`.
    pub fn offset_for(&self, index: u64) -> Result<u64> {
        let offsets = self.shared.offsets.read();
        if index < self.info.base_index {
            return Err(WalError::NotFound);
        }
        match offsets.get((index - self.info.base_index) as usize) {
            Some(off) => Ok(*off as u64),
            None => Err(WalError::NotFound),
        }
    }

    pub(crate) fn info(&self) -> SegmentInfo {
        self.info
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.shared.last_index()
    }

    pub(crate) fn count(&self) -> usize {
        self.shared.count()
    }

    pub(crate) fn shared(&self) -> Arc<TailShared> {
        Arc::clone(&self.shared)
    }
}
