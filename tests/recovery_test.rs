//! Crash recovery: torn tails, orphaned files, and missing segments.
//!
//! Crashes are simulated the blunt way: write the log, then edit the files
//! underneath it exactly as an interrupted kernel write would have left
//! them, and reopen.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use segwal::{FileMetaStore, LogEntry, MetaStore, SegmentInfo, Wal, WalConfig, WalError};
use tempfile::tempdir;

const FILE_HEADER_LEN: u64 = 32;
/// Encoded frame size of one 16-byte payload: 8-byte header + payload.
const FRAME_LEN: u64 = 24;

fn payload(index: u64) -> Vec<u8> {
    format!("entry-{index:010}").into_bytes()
}

fn batch(range: std::ops::RangeInclusive<u64>) -> Vec<LogEntry> {
    range.map(|i| LogEntry::new(i, payload(i))).collect()
}

fn catalog(dir: &Path) -> Vec<SegmentInfo> {
    let mut store = FileMetaStore::new();
    store.load(dir).unwrap().segments
}

fn tail_path(dir: &Path) -> PathBuf {
    let segments = catalog(dir);
    dir.join(segments.last().unwrap().file_name())
}

fn write_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn test_torn_frame_after_durable_entries_is_discarded() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=5)).unwrap();
        wal.close().unwrap();
    }

    // A batch whose fsync never finished: a frame header landed at the
    // write cursor but its payload did not (still preallocated zeros, so
    // the checksum cannot match).
    let torn_offset = FILE_HEADER_LEN + 5 * FRAME_LEN;
    let mut torn = [0u8; 8];
    torn[0] = 1; // entry type tag
    torn[1] = 0x5A;
    torn[4..8].copy_from_slice(&16u32.to_le_bytes());
    write_at(&tail_path(dir.path()), torn_offset, &torn);

    let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
    assert_eq!(wal.last_index(), 5);
    assert_eq!(wal.get_log(5).unwrap().data, payload(5));
    assert!(matches!(wal.get_log(6), Err(WalError::NotFound)));

    // Appending continues at last_index + 1 and overwrites the torn bytes.
    wal.store_logs(&batch(6..=8)).unwrap();
    assert_eq!(wal.get_log(6).unwrap().data, payload(6));
    assert_eq!(wal.last_index(), 8);
}

#[test]
fn test_partial_header_is_discarded() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=3)).unwrap();
        wal.close().unwrap();
    }

    // Only the first bytes of the next frame header made it to disk.
    let torn_offset = FILE_HEADER_LEN + 3 * FRAME_LEN;
    write_at(&tail_path(dir.path()), torn_offset, &[1, 2, 3]);

    let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
    assert_eq!(wal.last_index(), 3);
    wal.store_logs(&batch(4..=4)).unwrap();
    assert_eq!(wal.get_log(4).unwrap().data, payload(4));
}

#[test]
fn test_recovery_reads_only_durable_prefix_after_arbitrary_truncation() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=5)).unwrap();
        wal.close().unwrap();
    }

    // Crash mid-frame: the file ends partway through entry 5's frame.
    let path = tail_path(dir.path());
    let cut = FILE_HEADER_LEN + 4 * FRAME_LEN + 11;
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    file.set_len(cut).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
    assert_eq!(wal.last_index(), 4);
    assert_eq!(wal.get_log(4).unwrap().data, payload(4));
    assert!(matches!(wal.get_log(5), Err(WalError::NotFound)));

    wal.store_logs(&batch(5..=5)).unwrap();
    assert_eq!(wal.get_log(5).unwrap().data, payload(5));
}

#[test]
fn test_orphan_segment_files_are_swept() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=3)).unwrap();
        wal.close().unwrap();
    }

    // A rotation that crashed between creating its file and committing the
    // catalog leaves an unreferenced segment behind.
    let orphan = dir
        .path()
        .join(format!("seg-{:020}-{:020}.wal", 4_u64, 99_u64));
    std::fs::write(&orphan, b"leftover from an interrupted rotation").unwrap();

    let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
    assert!(!orphan.exists(), "orphan file should have been deleted");
    assert_eq!(wal.last_index(), 3);
}

#[test]
fn test_recovery_across_sealed_segments() {
    let dir = tempdir().unwrap();
    let config = WalConfig::new().with_segment_size(512);
    {
        let wal = Wal::open(dir.path(), config.clone()).unwrap();
        for start in (1..=60).step_by(10) {
            wal.store_logs(&batch(start..=start + 9)).unwrap();
        }
        wal.close().unwrap();
    }

    let segments = catalog(dir.path());
    assert!(segments.len() >= 3, "expected rotations before recovery");

    let wal = Wal::open(dir.path(), config).unwrap();
    assert_eq!(wal.first_index(), 1);
    assert_eq!(wal.last_index(), 60);
    for i in 1..=60 {
        assert_eq!(wal.get_log(i).unwrap().data, payload(i), "index {i}");
    }
    wal.store_logs(&batch(61..=70)).unwrap();
    assert_eq!(wal.last_index(), 70);
}

#[test]
fn test_missing_tail_file_is_corrupt() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=3)).unwrap();
        wal.close().unwrap();
    }

    std::fs::remove_file(tail_path(dir.path())).unwrap();
    assert!(matches!(
        Wal::open(dir.path(), WalConfig::for_testing()),
        Err(WalError::Corrupt(_))
    ));
}

#[test]
fn test_missing_sealed_file_is_corrupt() {
    let dir = tempdir().unwrap();
    let config = WalConfig::new().with_segment_size(512);
    {
        let wal = Wal::open(dir.path(), config.clone()).unwrap();
        for start in (1..=40).step_by(10) {
            wal.store_logs(&batch(start..=start + 9)).unwrap();
        }
        wal.close().unwrap();
    }

    let segments = catalog(dir.path());
    let sealed = segments.first().unwrap();
    assert!(sealed.is_sealed());
    std::fs::remove_file(dir.path().join(sealed.file_name())).unwrap();

    assert!(matches!(
        Wal::open(dir.path(), config),
        Err(WalError::Corrupt(_))
    ));
}

#[test]
fn test_reopen_without_close_recovers() {
    let dir = tempdir().unwrap();
    {
        let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
        wal.store_logs(&batch(1..=10)).unwrap();
        // Dropped without close; store_logs already fsynced everything.
    }

    let wal = Wal::open(dir.path(), WalConfig::for_testing()).unwrap();
    assert_eq!(wal.last_index(), 10);
    assert_eq!(wal.get_log(10).unwrap().data, payload(10));
}
