//! Directory-level segment file operations: creation, recovery, deletion,
//! enumeration, and the offline dump used by `waldump`.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{Result, WalError};
use crate::format::{
    read_file_header, validate_file_header, write_file_header, FrameType, FILE_HEADER_LEN,
};
use crate::format::frame::verify_payload;
use crate::fs;
use crate::segment::reader::{read_frame_at, scan_entry_frames, SegmentReader};
use crate::segment::writer::SegmentWriter;
use crate::types::{LogEntry, SegmentInfo};

/// A segment file found on disk, identified by the name's
/// `(base_index, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentFile {
    pub base_index: u64,
    pub id: u64,
    pub path: PathBuf,
}

/// Manages the segment files of one WAL directory.
pub struct SegmentFiler {
    dir: PathBuf,
}

impl SegmentFiler {
    /// Filer over `dir`. The directory must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SegmentFiler { dir: dir.into() }
    }

    fn segment_path(&self, info: &SegmentInfo) -> PathBuf {
        self.dir.join(info.file_name())
    }

    /// Create the file for a new tail segment: header written, body
    /// preallocated to `size_limit`, file and directory fsynced.
    pub(crate) fn create(&self, info: SegmentInfo) -> Result<SegmentWriter> {
        let path = self.segment_path(&info);
        let mut file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut hdr = [0u8; FILE_HEADER_LEN];
        write_file_header(&mut hdr, &info)?;
        file.write_all(&hdr)?;
        fs::preallocate(&file, info.size_limit)?;
        file.sync_all()?;
        fs::sync_dir(&self.dir)?;

        debug!(
            target: "segwal::segment",
            segment = info.id,
            base_index = info.base_index,
            "Created segment file"
        );
        Ok(SegmentWriter::create(file, info))
    }

    /// Open a sealed segment for reading.
    pub(crate) fn open_sealed(&self, info: SegmentInfo) -> Result<SegmentReader> {
        let path = self.segment_path(&info);
        let file = match File::options().read(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        SegmentReader::open(file, info)
    }

    /// Reopen the unsealed tail after a restart: validate the header, then
    /// rebuild the offset table by scanning entry frames forward. Whatever
    /// follows the last valid frame is discarded by the scan.
    pub(crate) fn recover_tail(&self, info: SegmentInfo) -> Result<SegmentWriter> {
        let path = self.segment_path(&info);
        let mut file = match File::options().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

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

        let file_len = file.metadata()?.len();
        let scan = scan_entry_frames(&mut file, file_len)?;
        // A crash between create and preallocate can leave the file short.
        fs::preallocate(&file, info.size_limit)?;

        debug!(
            target: "segwal::segment",
            segment = info.id,
            base_index = info.base_index,
            entries = scan.offsets.len(),
            write_offset = scan.end_offset,
            "Recovered tail segment"
        );
        Ok(SegmentWriter::recover(file, info, scan))
    }

    /// Delete a segment's file and fsync the directory.
    pub(crate) fn delete(&self, info: &SegmentInfo) -> Result<()> {
        std::fs::remove_file(self.segment_path(info))?;
        fs::sync_dir(&self.dir)?;
        Ok(())
    }

    /// Enumerate segment files present on disk, unordered.
    pub(crate) fn list(&self) -> Result<Vec<SegmentFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((base_index, id)) = parse_segment_file_name(name) {
                files.push(SegmentFile {
                    base_index,
                    id,
                    path: entry.path(),
                });
            }
        }
        Ok(files)
    }

    /// Delete every segment file not referenced by `live` `(base_index, id)`
    /// pairs. Returns how many files were removed.
    pub(crate) fn sweep_orphans(&self, live: &HashSet<(u64, u64)>) -> Result<usize> {
        let mut removed = 0;
        for file in self.list()? {
            if live.contains(&(file.base_index, file.id)) {
                continue;
            }
            warn!(
                target: "segwal::segment",
                path = %file.path.display(),
                "Removing segment file not referenced by the catalog"
            );
            std::fs::remove_file(&file.path)?;
            removed += 1;
        }
        if removed > 0 {
            fs::sync_dir(&self.dir)?;
        }
        Ok(removed)
    }

    /// Visit every entry whose index lies in the exclusive range
    /// `(after, before)` across all segment files, in `base_index` order.
    /// `before == 0` means no upper bound. The visitor returns `false` to
    /// stop early.
    ///
    /// Works directly from the files, without the catalog, so it can inspect
    /// a directory whose WAL is not open.
    pub fn dump_logs(
        &self,
        after: u64,
        before: u64,
        mut visit: impl FnMut(&SegmentInfo, LogEntry) -> bool,
    ) -> Result<()> {
        let mut files = self.list()?;
        files.sort_by_key(|f| (f.base_index, f.id));

        for seg in files {
            if before != 0 && seg.base_index >= before {
                break;
            }

            let mut file = File::options().read(true).open(&seg.path)?;
            let mut hdr = [0u8; FILE_HEADER_LEN];
            file.read_exact(&mut hdr).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    WalError::Corrupt(format!(
                        "segment file {} shorter than its header",
                        seg.path.display()
                    ))
                } else {
                    WalError::Io(e)
                }
            })?;
            let header = read_file_header(&hdr)?;
            if header.base_index != seg.base_index || header.id != seg.id {
                return Err(WalError::Corrupt(format!(
                    "segment file {} does not match its name",
                    seg.path.display()
                )));
            }

            let file_len = file.metadata()?.len();
            let scan = scan_entry_frames(&mut file, file_len)?;

            let mut info = SegmentInfo::new_tail(seg.id, seg.base_index, 0);
            info.create_time = 0;
            if !scan.offsets.is_empty() {
                info.max_index = seg.base_index + scan.offsets.len() as u64 - 1;
            }

            for (i, offset) in scan.offsets.iter().enumerate() {
                let index = seg.base_index + i as u64;
                if index <= after {
                    continue;
                }
                if before != 0 && index >= before {
                    break;
                }

                let (frame, payload) = read_frame_at(&mut file, *offset as u64)?;
                if frame.typ != FrameType::Entry {
                    return Err(WalError::Corrupt(format!(
                        "segment file {}: expected entry frame at offset {offset}",
                        seg.path.display()
                    )));
                }
                verify_payload(&frame, &payload)?;
                if !visit(&info, LogEntry::new(index, payload)) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Parse `seg-<base_index:020>-<id:020>.wal`.
pub(crate) fn parse_segment_file_name(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix("seg-")?.strip_suffix(".wal")?;
    let (base, id) = rest.split_once('-')?;
    if base.len() != 20 || id.len() != 20 {
        return None;
    }
    Some((base.parse().ok()?, id.parse().ok()?))
}
