//! Operational counters for the WAL.
//!
//! Plain atomics so recording is wait-free on the append path; `snapshot`
//! reads everything relaxed. Counters never affect correctness.

use std::sync::atomic::{AtomicU64, Ordering};

/// Direction of a truncation, for the per-direction counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationKind {
    /// Oldest entries discarded.
    Front,
    /// Newest entries discarded.
    Back,
}

/// Counters and gauges maintained by a [`crate::Wal`].
#[derive(Debug, Default)]
pub struct Metrics {
    /// Bytes of entry payload written (excludes frame headers and padding).
    entry_bytes_written: AtomicU64,
    /// Entries written.
    entries_written: AtomicU64,
    /// Calls to `store_logs`, i.e. batches appended.
    appends: AtomicU64,
    /// Bytes of entry payload read.
    entry_bytes_read: AtomicU64,
    /// Calls to `get_log`.
    entries_read: AtomicU64,
    /// Times the tail moved to a new segment file.
    segment_rotations: AtomicU64,
    entries_truncated_front: AtomicU64,
    entries_truncated_back: AtomicU64,
    truncations_front_success: AtomicU64,
    truncations_front_failure: AtomicU64,
    truncations_back_success: AtomicU64,
    truncations_back_failure: AtomicU64,
    /// Gauge: seconds between the last rotated segment's creation and its
    /// seal. Rough estimate of how quickly writes fill the disk.
    last_segment_age_seconds: AtomicU64,
}

impl Metrics {
    /// Fresh zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, entries: u64, payload_bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.entries_written.fetch_add(entries, Ordering::Relaxed);
        self.entry_bytes_written
            .fetch_add(payload_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, payload_bytes: u64) {
        self.entries_read.fetch_add(1, Ordering::Relaxed);
        self.entry_bytes_read
            .fetch_add(payload_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self, segment_age_seconds: u64) {
        self.segment_rotations.fetch_add(1, Ordering::Relaxed);
        self.last_segment_age_seconds
            .store(segment_age_seconds, Ordering::Relaxed);
    }

    pub(crate) fn record_truncation(&self, kind: TruncationKind, success: bool, entries: u64) {
        let (outcome, truncated) = match kind {
            TruncationKind::Front => (
                if success {
                    &self.truncations_front_success
                } else {
                    &self.truncations_front_failure
                },
                &self.entries_truncated_front,
            ),
            TruncationKind::Back => (
                if success {
                    &self.truncations_back_success
                } else {
                    &self.truncations_back_failure
                },
                &self.entries_truncated_back,
            ),
        };
        outcome.fetch_add(1, Ordering::Relaxed);
        truncated.fetch_add(entries, Ordering::Relaxed);
    }

    /// Read all counters at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entry_bytes_written: self.entry_bytes_written.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            appends: self.appends.load(Ordering::Relaxed),
            entry_bytes_read: self.entry_bytes_read.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            segment_rotations: self.segment_rotations.load(Ordering::Relaxed),
            entries_truncated_front: self.entries_truncated_front.load(Ordering::Relaxed),
            entries_truncated_back: self.entries_truncated_back.load(Ordering::Relaxed),
            truncations_front_success: self.truncations_front_success.load(Ordering::Relaxed),
            truncations_front_failure: self.truncations_front_failure.load(Ordering::Relaxed),
            truncations_back_success: self.truncations_back_success.load(Ordering::Relaxed),
            truncations_back_failure: self.truncations_back_failure.load(Ordering::Relaxed),
            last_segment_age_seconds: self.last_segment_age_seconds.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub entry_bytes_written: u64,
    pub entries_written: u64,
    pub appends: u64,
    pub entry_bytes_read: u64,
    pub entries_read: u64,
    pub segment_rotations: u64,
    pub entries_truncated_front: u64,
    pub entries_truncated_back: u64,
    pub truncations_front_success: u64,
    pub truncations_front_failure: u64,
    pub truncations_back_success: u64,
    pub truncations_back_failure: u64,
    pub last_segment_age_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_counters() {
        let m = Metrics::new();
        m.record_append(3, 120);
        m.record_append(1, 8);

        let snap = m.snapshot();
        assert_eq!(snap.appends, 2);
        assert_eq!(snap.entries_written, 4);
        assert_eq!(snap.entry_bytes_written, 128);
    }

    #[test]
    fn test_truncation_counters_by_kind() {
        let m = Metrics::new();
        m.record_truncation(TruncationKind::Front, true, 10);
        m.record_truncation(TruncationKind::Front, false, 0);
        m.record_truncation(TruncationKind::Back, true, 4);

        let snap = m.snapshot();
        assert_eq!(snap.entries_truncated_front, 10);
        assert_eq!(snap.entries_truncated_back, 4);
        assert_eq!(snap.truncations_front_success, 1);
        assert_eq!(snap.truncations_front_failure, 1);
        assert_eq!(snap.truncations_back_success, 1);
        assert_eq!(snap.truncations_back_failure, 0);
    }

    #[test]
    fn test_rotation_gauge_overwrites() {
        let m = Metrics::new();
        m.record_rotation(30);
        m.record_rotation(7);

        let snap = m.snapshot();
        assert_eq!(snap.segment_rotations, 2);
        assert_eq!(snap.last_segment_age_seconds, 7);
    }
}
