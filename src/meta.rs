//! Meta catalog: the atomically persisted list of live segments.
//!
//! The catalog is the single source of truth for which segment files are
//! live. Commits replace the whole state using write-temp, fsync, rename,
//! fsync-directory, so a crash mid-commit leaves either the old state or
//! the new one, never a torn mix.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, WalError};
use crate::fs;
use crate::types::PersistentState;

/// Catalog file name inside the WAL directory.
pub const META_FILE_NAME: &str = "wal-meta.json";

/// Persistence contract for the catalog.
///
/// The WAL calls `commit_state` from one thread at a time and never
/// concurrently with `load`; it may overlap with reads that do not mutate
/// catalog state. `commit_state` must not return until the new state is
/// durable.
pub trait MetaStore: Send {
    /// Load the persisted state from `dir`.
    ///
    /// A directory with no catalog yields an empty state; a missing
    /// directory is `NotFound`. Loading again from the same directory is
    /// allowed; a different directory while open is `AlreadyOpen`.
    fn load(&mut self, dir: &Path) -> Result<PersistentState>;

    /// Atomically replace the entire persisted state.
    ///
    /// `Uninitialized` before the first successful `load`.
    fn commit_state(&mut self, state: &PersistentState) -> Result<()>;

    /// Release the catalog. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Default catalog: `PersistentState` as JSON in [`META_FILE_NAME`].
#[derive(Debug, Default)]
pub struct FileMetaStore {
    dir: Option<PathBuf>,
}

impl FileMetaStore {
    /// A store with no directory bound yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for FileMetaStore {
    fn load(&mut self, dir: &Path) -> Result<PersistentState> {
        if let Some(open) = &self.dir {
            if open != dir {
                return Err(WalError::AlreadyOpen {
                    open: open.clone(),
                    requested: dir.to_path_buf(),
                });
            }
        }
        match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(WalError::Io(std::io::Error::other(format!(
                    "{} is not a directory",
                    dir.display()
                ))))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalError::NotFound)
            }
            Err(e) => return Err(e.into()),
        }

        let raw = match std::fs::read(dir.join(META_FILE_NAME)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Valid state, just an empty log.
                self.dir = Some(dir.to_path_buf());
                return Ok(PersistentState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let state = if raw.is_empty() {
            PersistentState::default()
        } else {
            serde_json::from_slice(&raw)
                .map_err(|e| WalError::Corrupt(format!("failed to parse catalog: {e}")))?
        };
        self.dir = Some(dir.to_path_buf());
        Ok(state)
    }

    fn commit_state(&mut self, state: &PersistentState) -> Result<()> {
        let dir = self.dir.as_ref().ok_or(WalError::Uninitialized)?;

        let raw = serde_json::to_vec(state)
            .map_err(|e| WalError::Corrupt(format!("failed to encode catalog: {e}")))?;

        let tmp = dir.join(format!("{META_FILE_NAME}.tmp"));
        let dst = dir.join(META_FILE_NAME);

        let mut file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&raw)?;
        file.sync_all()?;
        drop(file);

        fs::atomic_replace(&tmp, &dst)?;
        debug!(
            target: "segwal::meta",
            segments = state.segments.len(),
            next_segment_id = state.next_segment_id,
            "Committed catalog state"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dir = None;
        Ok(())
    }
}
