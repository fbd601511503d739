//! Core data model: log entries, segment metadata, and the persisted
//! catalog state.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single log entry.
///
/// `index` is strictly monotonically increasing across the lifetime of the
/// WAL. `data` is opaque to the log and may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of this entry in the log.
    pub index: u64,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Create a new entry.
    pub fn new(index: u64, data: Vec<u8>) -> Self {
        LogEntry { index, data }
    }
}

/// Metadata describing one segment file.
///
/// A segment is sealed iff `index_start != 0 && max_index != 0`. Exactly one
/// segment, the tail, is unsealed at any time while the WAL is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Unique identity, assigned monotonically from
    /// [`PersistentState::next_segment_id`].
    pub id: u64,

    /// Index of the first entry this segment is permitted to contain.
    pub base_index: u64,

    /// Index of the first entry readable from this segment. Equals
    /// `base_index` unless front truncation advanced it.
    pub min_index: u64,

    /// Index of the last entry; 0 while unsealed or empty.
    pub max_index: u64,

    /// Byte offset of the tail index frame; 0 while unsealed.
    pub index_start: u64,

    /// Target maximum file size. Soft cap: crossing it triggers rotation
    /// after the append that crossed it.
    pub size_limit: u64,

    /// Creation wall-clock, microseconds since the Unix epoch. Operational
    /// visibility only.
    pub create_time: u64,

    /// Seal wall-clock, microseconds since the Unix epoch; 0 while unsealed.
    pub seal_time: u64,
}

impl SegmentInfo {
    /// Metadata for a fresh, empty tail segment.
    pub fn new_tail(id: u64, base_index: u64, size_limit: u64) -> Self {
        SegmentInfo {
            id,
            base_index,
            min_index: base_index,
            max_index: 0,
            index_start: 0,
            size_limit,
            create_time: unix_micros(),
            seal_time: 0,
        }
    }

    /// Whether this segment has been sealed (index and commit frames
    /// written, file immutable).
    pub fn is_sealed(&self) -> bool {
        self.index_start != 0 && self.max_index != 0
    }

    /// Deterministic on-disk file name for this segment.
    pub fn file_name(&self) -> String {
        format!("seg-{:020}-{:020}.wal", self.base_index, self.id)
    }
}

/// The atomically persisted catalog state: which segments exist and the next
/// segment id to assign.
///
/// `segments` is ordered by `base_index` ascending with non-overlapping
/// sealed ranges; the final entry is the unsealed tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Next segment id to assign; always greater than every live id.
    pub next_segment_id: u64,
    /// Live segments, ordered by `base_index`.
    pub segments: Vec<SegmentInfo>,
}

/// Current wall-clock as microseconds since the Unix epoch.
pub(crate) fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sealed_predicate() {
        let mut info = SegmentInfo::new_tail(1, 1, 1024);
        assert!(!info.is_sealed());

        info.max_index = 10;
        assert!(!info.is_sealed());

        info.index_start = 512;
        assert!(info.is_sealed());
    }

    #[test]
    fn test_file_name_is_deterministic_and_sortable() {
        let a = SegmentInfo::new_tail(7, 1, 1024);
        let b = SegmentInfo::new_tail(8, 21, 1024);
        assert_eq!(a.file_name(), a.file_name());
        assert!(a.file_name() < b.file_name());
        assert!(a.file_name().starts_with("seg-"));
        assert!(a.file_name().ends_with(".wal"));
    }

    #[test]
    fn test_persistent_state_roundtrip() {
        let mut state = PersistentState::default();
        state.next_segment_id = 3;
        state.segments.push(SegmentInfo::new_tail(1, 1, 4096));
        state.segments.push(SegmentInfo::new_tail(2, 100, 4096));

        let raw = serde_json::to_vec(&state).unwrap();
        let decoded: PersistentState = serde_json::from_slice(&raw).unwrap();
        assert_eq!(state, decoded);
    }
}
