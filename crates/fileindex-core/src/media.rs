use std::path::Path;

use crate::error::Result;

/// Images above this size are not inspected.
pub const MAX_INSPECTED_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// Epoch millis.
    pub original_date: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Extracts image metadata from file bytes already read for hashing.
pub trait MediaInspector: Send + Sync {
    /// Whether the indexer should keep file bytes around for [`Self::inspect`].
    fn enabled(&self) -> bool {
        true
    }

    fn inspect(&self, path: &Path, data: &[u8]) -> Result<Option<MediaInfo>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoMedia;

impl MediaInspector for NoMedia {
    fn enabled(&self) -> bool {
        false
    }

    fn inspect(&self, _path: &Path, _data: &[u8]) -> Result<Option<MediaInfo>> {
        Ok(None)
    }
}
