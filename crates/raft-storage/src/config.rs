//! # config
//!
//! why: expose the durability and file-size knobs of the segmented log
//! relations: passed to SegmentedRaftLog::open and ClusterStateDirectory::open; embedded in raft-transport's GroupConfig
//! what: StorageConfig

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// tunables of the on-disk log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// a segment is rotated once the next record would push it past this size
    pub segment_size_bytes: u64,
    /// fsync after every append, truncate and commit marker write
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            segment_size_bytes: 16 * 1024 * 1024,
            fsync: true,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.segment_size_bytes < 1024 {
            return Err(StorageError::InvalidConfig(format!(
                "segment_size_bytes {} is below the 1024 byte minimum",
                self.segment_size_bytes
            )));
        }
        Ok(())
    }
}
