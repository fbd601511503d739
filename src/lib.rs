//! Segmented, durable write-ahead log for replicated state machines.
//!
//! Entries carry a strictly monotonically increasing `u64` index and an
//! opaque payload. Storage is a directory of segment files plus an
//! atomically committed catalog tracking which segments exist:
//!
//! - exactly one unsealed *tail* segment accepts appends; a batch is
//!   fsynced before its offsets become visible to readers
//! - when the tail crosses its size budget it is *sealed* (a dense offset
//!   index and a commit marker are appended) and a fresh tail is installed
//! - sealed segments are immutable and served by shared readers
//! - truncation discards whole segments from either end; the catalog commit
//!   always lands before any file is deleted
//!
//! # Quick Start
//!
//! ```no_run
//! use segwal::{LogEntry, Wal, WalConfig};
//!
//! fn main() -> segwal::Result<()> {
//!     let wal = Wal::open("./wal-data", WalConfig::default())?;
//!
//!     wal.store_logs(&[
//!         LogEntry::new(1, b"first".to_vec()),
//!         LogEntry::new(2, b"second".to_vec()),
//!     ])?;
//!
//!     assert_eq!(wal.get_log(2)?.data, b"second");
//!     assert_eq!(wal.first_index(), 1);
//!     assert_eq!(wal.last_index(), 2);
//!
//!     // Discard entries once a snapshot covers them.
//!     wal.delete_range(1, 1)?;
//!     wal.close()
//! }
//! ```
//!
//! # Recovery
//!
//! Recovery is implicit in [`Wal::open`]: sealed segments are verified
//! against the catalog, the tail's offset table is rebuilt by scanning its
//! entry frames (discarding any torn batch), and files left behind by an
//! interrupted rotation are swept.

#![warn(missing_docs)]

pub mod config;
pub mod error;
mod format;
mod fs;
pub mod meta;
pub mod metrics;
pub mod segment;
pub mod types;
mod wal;

pub use config::{WalConfig, WalConfigError, DEFAULT_SEGMENT_SIZE};
pub use error::{Result, WalError};
pub use meta::{FileMetaStore, MetaStore, META_FILE_NAME};
pub use metrics::{Metrics, MetricsSnapshot};
pub use segment::{SegmentFiler, SegmentReader, SegmentWriter};
pub use types::{LogEntry, PersistentState, SegmentInfo};
pub use wal::Wal;
