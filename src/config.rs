//! WAL configuration.

/// Default target maximum bytes per segment file (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Smallest accepted segment size. Must leave room for the file header and
/// at least a few frames.
pub const MIN_SEGMENT_SIZE: u64 = 512;

/// WAL configuration parameters.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Target maximum segment size in bytes (default: 64 MiB).
    ///
    /// The limit is soft: the append that crosses it is accepted and the
    /// segment is rotated afterwards.
    pub segment_size: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl WalConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(WalConfigError::SegmentSizeTooSmall);
        }
        Ok(())
    }

    /// Configuration with small segments for fast rotation in tests.
    pub fn for_testing() -> Self {
        WalConfig {
            segment_size: 4 * 1024,
        }
    }
}

/// WAL configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    /// Segment size below [`MIN_SEGMENT_SIZE`].
    #[error("segment size must be at least {MIN_SEGMENT_SIZE} bytes")]
    SegmentSizeTooSmall,
}
