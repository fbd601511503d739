//! WAL coordinator: the public facade owning recovery, rotation, and
//! truncation.
//!
//! Every mutating operation (`store_logs`, `delete_range`, rotation,
//! `close`) serializes on one mutex. Reads go through a copy-on-write
//! snapshot of the segment list that writers swap after their mutation is
//! durable, so readers never block the append path and never observe
//! non-durable state.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::WalConfig;
use crate::error::{Result, WalError};
use crate::meta::{FileMetaStore, MetaStore};
use crate::metrics::{Metrics, TruncationKind};
use crate::segment::{SegmentFiler, SegmentReader, SegmentWriter, TailShared};
use crate::types::{LogEntry, PersistentState, SegmentInfo};

/// Durable, append-only log of monotonically indexed entries.
///
/// One instance owns a directory. Appends are single-writer; reads are safe
/// from any number of threads concurrently with writes.
pub struct Wal {
    dir: PathBuf,
    config: WalConfig,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
    inner: Mutex<Inner>,
    snapshot: RwLock<Arc<SegmentList>>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Writer-side state, guarded by the coordinator mutex.
struct Inner {
    meta: Box<dyn MetaStore>,
    filer: SegmentFiler,
    state: PersistentState,
    tail: SegmentWriter,
    readers: BTreeMap<u64, Arc<SegmentReader>>,
    closed: bool,
}

/// Immutable snapshot of the readable segments, ordered by `base_index`.
#[derive(Default)]
struct SegmentList {
    refs: Vec<SegmentRef>,
}

struct SegmentRef {
    info: SegmentInfo,
    cursor: Cursor,
}

enum Cursor {
    Sealed(Arc<SegmentReader>),
    Tail(Arc<TailShared>),
}

impl SegmentRef {
    fn get_log(&self, index: u64) -> Result<LogEntry> {
        match &self.cursor {
            Cursor::Sealed(reader) => {
                // Bounds come from the snapshot's info: front truncation may
                // have advanced min_index past what the reader was opened
                // with.
                if index < self.info.min_index || index > self.info.max_index {
                    return Err(WalError::NotFound);
                }
                reader.get_log(index)
            }
            Cursor::Tail(tail) => tail.get_log(index),
        }
    }
}

impl SegmentList {
    fn find(&self, index: u64) -> Option<&SegmentRef> {
        let i = self
            .refs
            .partition_point(|r| r.info.base_index <= index);
        if i == 0 {
            None
        } else {
            Some(&self.refs[i - 1])
        }
    }

    fn get_log(&self, index: u64) -> Result<LogEntry> {
        match self.find(index) {
            Some(seg) => seg.get_log(index),
            None => Err(WalError::NotFound),
        }
    }

    fn first_index(&self) -> u64 {
        match self.refs.first() {
            None => 0,
            Some(head) => match &head.cursor {
                Cursor::Sealed(_) => head.info.min_index,
                Cursor::Tail(tail) => {
                    if tail.count() == 0 {
                        0
                    } else {
                        tail.base_index()
                    }
                }
            },
        }
    }

    fn last_index(&self) -> u64 {
        match self.refs.last() {
            None => 0,
            Some(last) => match &last.cursor {
                Cursor::Sealed(_) => last.info.max_index,
                Cursor::Tail(tail) => {
                    if tail.count() > 0 {
                        tail.last_index()
                    } else if self.refs.len() >= 2 {
                        self.refs[self.refs.len() - 2].info.max_index
                    } else {
                        0
                    }
                }
            },
        }
    }
}

impl Wal {
    /// Open (or create) the WAL in `dir` with the default file-backed
    /// catalog.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig) -> Result<Wal> {
        Self::open_with_meta_store(dir, config, Box::new(FileMetaStore::new()))
    }

    /// Open with a caller-provided catalog implementation.
    pub fn open_with_meta_store(
        dir: impl AsRef<Path>,
        config: WalConfig,
        mut meta: Box<dyn MetaStore>,
    ) -> Result<Wal> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut state = meta.load(&dir)?;
        let filer = SegmentFiler::new(&dir);
        let mut readers = BTreeMap::new();

        let tail = if state.segments.is_empty() {
            let writer = bootstrap_tail(&mut meta, &filer, &mut state, &config, 1)?;
            info!(
                target: "segwal::wal",
                dir = %dir.display(),
                "Initialized new write-ahead log"
            );
            writer
        } else {
            validate_catalog(&state)?;
            let (last, sealed) = state
                .segments
                .split_last()
                .map(|(l, s)| (*l, s.to_vec()))
                .expect("segments is non-empty");

            for info in &sealed {
                let reader = open_sealed_for_recovery(&filer, info)?;
                readers.insert(info.base_index, Arc::new(reader));
            }

            if last.is_sealed() {
                // A close or crash can leave every segment sealed; reads
                // still work, appends need a fresh tail.
                let reader = open_sealed_for_recovery(&filer, &last)?;
                readers.insert(last.base_index, Arc::new(reader));
                bootstrap_tail(&mut meta, &filer, &mut state, &config, last.max_index + 1)?
            } else {
                let writer = filer.recover_tail(last).map_err(|e| match e {
                    WalError::NotFound => WalError::Corrupt(format!(
                        "catalog references segment {} but its file is missing",
                        last.id
                    )),
                    other => other,
                })?;
                info!(
                    target: "segwal::wal",
                    dir = %dir.display(),
                    segments = state.segments.len(),
                    tail_entries = writer.count(),
                    "Recovered write-ahead log"
                );
                writer
            }
        };

        // Anything on disk the catalog does not reference is garbage from an
        // interrupted rotation or truncation.
        let live: HashSet<(u64, u64)> = state
            .segments
            .iter()
            .map(|s| (s.base_index, s.id))
            .collect();
        filer.sweep_orphans(&live)?;

        let wal = Wal {
            dir,
            config,
            metrics: Arc::new(Metrics::new()),
            closed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                meta,
                filer,
                state,
                tail,
                readers,
                closed: false,
            }),
            snapshot: RwLock::new(Arc::new(SegmentList::default())),
        };
        {
            let inner = wal.inner.lock();
            wal.publish(&inner);
        }
        Ok(wal)
    }

    /// Append a contiguous batch whose indices are exactly
    /// `last_index + 1 ..= last_index + N`.
    ///
    /// On success every entry is durable and readable from any thread.
    /// On error nothing from the batch should be assumed durable.
    pub fn store_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }

        // A rotation that sealed the tail but failed to commit leaves a
        // sealed tail behind; finish the rotation before appending.
        if inner.tail.is_sealed() {
            self.rotate(&mut inner)?;
        }

        inner.tail.append(entries)?;
        let payload_bytes: u64 = entries.iter().map(|e| e.data.len() as u64).sum();
        self.metrics
            .record_append(entries.len() as u64, payload_bytes);

        if inner.tail.write_offset() >= inner.tail.info().size_limit {
            self.rotate(&mut inner)?;
        }
        Ok(())
    }

    /// Read one entry. `NotFound` outside `[first_index, last_index]`.
    pub fn get_log(&self, index: u64) -> Result<LogEntry> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        let snapshot = Arc::clone(&self.snapshot.read());
        let entry = snapshot.get_log(index)?;
        self.metrics.record_read(entry.data.len() as u64);
        Ok(entry)
    }

    /// Index of the oldest stored entry; 0 when the log is empty.
    pub fn first_index(&self) -> u64 {
        self.snapshot.read().first_index()
    }

    /// Index of the newest stored entry; 0 when the log is empty.
    pub fn last_index(&self) -> u64 {
        self.snapshot.read().last_index()
    }

    /// Two-sided truncation.
    ///
    /// `min <= first_index` discards the front up to `max`;
    /// `max >= last_index` discards the back from `min` (segment-aligned
    /// only); a range covering everything empties the log. Interior holes
    /// and ranges splitting a segment are `InvalidRange`.
    pub fn delete_range(&self, min: u64, max: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }
        if min > max {
            return Ok(());
        }
        let first = first_index_locked(&inner);
        let last = last_index_locked(&inner);
        if last == 0 || max < first || min > last {
            return Ok(());
        }

        if min <= first && max >= last {
            return self.truncate_all(&mut inner, max, first, last);
        }
        if min <= first {
            return self.truncate_front(&mut inner, max, first);
        }
        if max >= last {
            return self.truncate_back(&mut inner, min, last);
        }
        Err(WalError::InvalidRange { min, max })
    }

    /// Flush and close. Idempotent; also runs on drop.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        self.closed.store(true, Ordering::Release);
        *self.snapshot.write() = Arc::new(SegmentList::default());

        let sync_result = if inner.tail.is_sealed() {
            Ok(())
        } else {
            inner.tail.sync()
        };
        inner.readers.clear();
        let close_result = inner.meta.close();

        sync_result?;
        close_result
    }

    /// Operational counters for this instance.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Directory this WAL lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Seal the current tail, create a new one, and commit the catalog.
    ///
    /// On a failed commit the created file is deleted and the sealed tail
    /// stays in place; the next append retries the rotation.
    fn rotate(&self, inner: &mut Inner) -> Result<()> {
        let sealed_info = if inner.tail.is_sealed() {
            inner.tail.info()
        } else {
            inner.tail.seal()?
        };
        let age_seconds = sealed_info.seal_time.saturating_sub(sealed_info.create_time) / 1_000_000;

        let id = inner.state.next_segment_id.max(1);
        let new_info = SegmentInfo::new_tail(id, sealed_info.max_index + 1, self.config.segment_size);
        let writer = inner.filer.create(new_info)?;
        let reader = match inner.filer.open_sealed(sealed_info) {
            Ok(r) => r,
            Err(e) => {
                let _ = inner.filer.delete(&new_info);
                return Err(e);
            }
        };

        let mut new_state = inner.state.clone();
        let last = new_state.segments.len() - 1;
        new_state.segments[last] = sealed_info;
        new_state.segments.push(new_info);
        new_state.next_segment_id = id + 1;

        if let Err(e) = inner.meta.commit_state(&new_state) {
            let _ = inner.filer.delete(&new_info);
            return Err(e);
        }

        inner.state = new_state;
        inner
            .readers
            .insert(sealed_info.base_index, Arc::new(reader));
        inner.tail = writer;
        self.publish(inner);

        self.metrics.record_rotation(age_seconds);
        debug!(
            target: "segwal::wal",
            sealed = sealed_info.id,
            new = new_info.id,
            base_index = new_info.base_index,
            "Rotated tail segment"
        );
        Ok(())
    }

    fn truncate_front(&self, inner: &mut Inner, k: u64, old_first: u64) -> Result<()> {
        let tail_base = inner
            .state
            .segments
            .last()
            .expect("open wal has a tail")
            .base_index;
        if inner.tail.count() > 0 && k >= tail_base {
            self.metrics
                .record_truncation(TruncationKind::Front, false, 0);
            return Err(WalError::InvalidRange {
                min: old_first,
                max: k,
            });
        }

        let mut new_state = inner.state.clone();
        let mut dropped = Vec::new();
        new_state.segments.retain(|s| {
            if s.is_sealed() && s.max_index <= k {
                dropped.push(*s);
                false
            } else {
                true
            }
        });
        if let Some(head) = new_state.segments.first_mut() {
            if head.is_sealed() && head.min_index <= k {
                head.min_index = k + 1;
            }
        }

        if let Err(e) = inner.meta.commit_state(&new_state) {
            self.metrics
                .record_truncation(TruncationKind::Front, false, 0);
            return Err(e);
        }
        inner.state = new_state;

        // Files go only after the commit that forgets them is durable.
        for info in &dropped {
            inner.readers.remove(&info.base_index);
            delete_or_warn(&inner.filer, info);
        }
        self.publish(inner);

        let new_first = first_index_locked(inner);
        self.metrics.record_truncation(
            TruncationKind::Front,
            true,
            new_first.saturating_sub(old_first),
        );
        info!(
            target: "segwal::wal",
            through = k,
            first_index = new_first,
            segments_deleted = dropped.len(),
            "Truncated log front"
        );
        Ok(())
    }

    fn truncate_back(&self, inner: &mut Inner, k: u64, old_last: u64) -> Result<()> {
        let tail_info = *inner.state.segments.last().expect("open wal has a tail");
        if k > tail_info.base_index {
            // Would split the tail.
            self.metrics
                .record_truncation(TruncationKind::Back, false, 0);
            return Err(WalError::InvalidRange {
                min: k,
                max: old_last,
            });
        }

        let sealed_count = inner.state.segments.len() - 1;
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for info in &inner.state.segments[..sealed_count] {
            if info.min_index >= k {
                dropped.push(*info);
            } else if info.max_index >= k {
                // Would split a sealed segment.
                self.metrics
                    .record_truncation(TruncationKind::Back, false, 0);
                return Err(WalError::InvalidRange {
                    min: k,
                    max: old_last,
                });
            } else {
                kept.push(*info);
            }
        }

        self.replace_tail(inner, kept, dropped, tail_info, k, old_last - k + 1)
    }

    fn truncate_all(
        &self,
        inner: &mut Inner,
        max: u64,
        old_first: u64,
        old_last: u64,
    ) -> Result<()> {
        let tail_info = *inner.state.segments.last().expect("open wal has a tail");
        let dropped: Vec<SegmentInfo> = inner.state.segments[..inner.state.segments.len() - 1]
            .to_vec();
        let removed = old_last - old_first + 1;
        self.replace_tail(inner, Vec::new(), dropped, tail_info, max + 1, removed)
    }

    /// Shared back-truncation commit path: install a fresh tail at
    /// `new_base`, keep `kept` sealed segments, delete `dropped` and the old
    /// tail after the catalog commit.
    fn replace_tail(
        &self,
        inner: &mut Inner,
        kept: Vec<SegmentInfo>,
        dropped: Vec<SegmentInfo>,
        old_tail: SegmentInfo,
        new_base: u64,
        removed_entries: u64,
    ) -> Result<()> {
        let id = inner.state.next_segment_id.max(1);
        let new_tail_info = SegmentInfo::new_tail(id, new_base, self.config.segment_size);
        let writer = match inner.filer.create(new_tail_info) {
            Ok(w) => w,
            Err(e) => {
                self.metrics
                    .record_truncation(TruncationKind::Back, false, 0);
                return Err(e);
            }
        };

        let mut new_state = PersistentState {
            next_segment_id: id + 1,
            segments: kept,
        };
        new_state.segments.push(new_tail_info);

        if let Err(e) = inner.meta.commit_state(&new_state) {
            let _ = inner.filer.delete(&new_tail_info);
            self.metrics
                .record_truncation(TruncationKind::Back, false, 0);
            return Err(e);
        }

        inner.state = new_state;
        inner.tail = writer;
        for info in &dropped {
            inner.readers.remove(&info.base_index);
            delete_or_warn(&inner.filer, info);
        }
        delete_or_warn(&inner.filer, &old_tail);
        self.publish(inner);

        self.metrics
            .record_truncation(TruncationKind::Back, true, removed_entries);
        info!(
            target: "segwal::wal",
            from = new_base,
            entries_removed = removed_entries,
            "Truncated log back"
        );
        Ok(())
    }

    /// Swap in a new read snapshot reflecting `inner.state`.
    fn publish(&self, inner: &Inner) {
        let count = inner.state.segments.len();
        let mut refs = Vec::with_capacity(count);
        for (i, info) in inner.state.segments.iter().enumerate() {
            let cursor = if i == count - 1 && !info.is_sealed() {
                Cursor::Tail(inner.tail.shared())
            } else {
                match inner.readers.get(&info.base_index) {
                    Some(reader) => Cursor::Sealed(Arc::clone(reader)),
                    None => {
                        debug_assert!(false, "no reader for sealed segment {}", info.id);
                        continue;
                    }
                }
            };
            refs.push(SegmentRef { info: *info, cursor });
        }
        *self.snapshot.write() = Arc::new(SegmentList { refs });
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Create and commit a fresh tail segment at `base_index`.
fn bootstrap_tail(
    meta: &mut Box<dyn MetaStore>,
    filer: &SegmentFiler,
    state: &mut PersistentState,
    config: &WalConfig,
    base_index: u64,
) -> Result<SegmentWriter> {
    let id = state.next_segment_id.max(1);
    let info = SegmentInfo::new_tail(id, base_index, config.segment_size);
    let writer = filer.create(info)?;

    let mut new_state = state.clone();
    new_state.next_segment_id = id + 1;
    new_state.segments.push(info);
    if let Err(e) = meta.commit_state(&new_state) {
        let _ = filer.delete(&info);
        return Err(e);
    }
    *state = new_state;
    Ok(writer)
}

fn open_sealed_for_recovery(filer: &SegmentFiler, info: &SegmentInfo) -> Result<SegmentReader> {
    if !info.is_sealed() {
        return Err(WalError::Corrupt(format!(
            "catalog has unsealed segment {} before the tail",
            info.id
        )));
    }
    filer.open_sealed(*info).map_err(|e| match e {
        WalError::NotFound => WalError::Corrupt(format!(
            "catalog references segment {} but its file is missing",
            info.id
        )),
        other => other,
    })
}

/// Structural checks on a loaded catalog before trusting it.
fn validate_catalog(state: &PersistentState) -> Result<()> {
    let mut max_id = 0;
    for pair in state.segments.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if !a.is_sealed() {
            return Err(WalError::Corrupt(format!(
                "catalog has unsealed segment {} before the tail",
                a.id
            )));
        }
        if b.base_index != a.max_index + 1 {
            return Err(WalError::Corrupt(format!(
                "catalog gap: segment {} ends at {} but segment {} starts at {}",
                a.id, a.max_index, b.id, b.base_index
            )));
        }
    }
    for info in &state.segments {
        if info.min_index < info.base_index {
            return Err(WalError::Corrupt(format!(
                "catalog segment {} has min_index {} below base_index {}",
                info.id, info.min_index, info.base_index
            )));
        }
        if info.is_sealed() && info.min_index > info.max_index {
            return Err(WalError::Corrupt(format!(
                "catalog segment {} has empty range [{}, {}]",
                info.id, info.min_index, info.max_index
            )));
        }
        max_id = max_id.max(info.id);
    }
    if state.next_segment_id <= max_id {
        return Err(WalError::Corrupt(format!(
            "catalog next_segment_id {} not above live ids (max {})",
            state.next_segment_id, max_id
        )));
    }
    Ok(())
}

fn first_index_locked(inner: &Inner) -> u64 {
    match inner.state.segments.first() {
        None => 0,
        Some(head) if head.is_sealed() => head.min_index,
        Some(_) => {
            if inner.tail.count() == 0 {
                0
            } else {
                inner.tail.info().base_index
            }
        }
    }
}

fn last_index_locked(inner: &Inner) -> u64 {
    if inner.tail.count() > 0 {
        return inner.tail.last_index();
    }
    let n = inner.state.segments.len();
    if n >= 2 {
        inner.state.segments[n - 2].max_index
    } else {
        0
    }
}

fn delete_or_warn(filer: &SegmentFiler, info: &SegmentInfo) {
    if let Err(e) = filer.delete(info) {
        // The catalog no longer references the file; the sweep on next open
        // removes it.
        warn!(
            target: "segwal::wal",
            segment = info.id,
            error = %e,
            "Failed to delete truncated segment file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(id: u64, base: u64, max: u64) -> SegmentInfo {
        let mut info = SegmentInfo::new_tail(id, base, 4096);
        info.max_index = max;
        info.index_start = 64;
        info
    }

    #[test]
    fn test_validate_catalog_accepts_well_formed() {
        let state = PersistentState {
            next_segment_id: 3,
            segments: vec![sealed(1, 1, 20), SegmentInfo::new_tail(2, 21, 4096)],
        };
        validate_catalog(&state).unwrap();
    }

    #[test]
    fn test_validate_catalog_rejects_gap() {
        let state = PersistentState {
            next_segment_id: 3,
            segments: vec![sealed(1, 1, 20), SegmentInfo::new_tail(2, 30, 4096)],
        };
        assert!(matches!(
            validate_catalog(&state),
            Err(WalError::Corrupt(_))
        ));
    }

    #[test]
    fn test_validate_catalog_rejects_unsealed_middle() {
        let state = PersistentState {
            next_segment_id: 4,
            segments: vec![
                sealed(1, 1, 20),
                SegmentInfo::new_tail(2, 21, 4096),
                SegmentInfo::new_tail(3, 40, 4096),
            ],
        };
        assert!(matches!(
            validate_catalog(&state),
            Err(WalError::Corrupt(_))
        ));
    }

    #[test]
    fn test_validate_catalog_rejects_stale_next_id() {
        let state = PersistentState {
            next_segment_id: 2,
            segments: vec![sealed(1, 1, 20), SegmentInfo::new_tail(2, 21, 4096)],
        };
        assert!(matches!(
            validate_catalog(&state),
            Err(WalError::Corrupt(_))
        ));
    }

    #[test]
    fn test_segment_list_find() {
        let list = SegmentList::default();
        assert!(list.find(1).is_none());
        assert_eq!(list.first_index(), 0);
        assert_eq!(list.last_index(), 0);
    }
}
