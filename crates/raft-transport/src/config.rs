//! # config
//!
//! why: one json file configures consensus, storage and framing of a raft group
//! relations: composes raft_core::RaftConfig and raft_storage::StorageConfig; read by pipeline.rs and runtime.rs
//! what: TransportConfig, GroupConfig

use std::fs;
use std::path::Path;

use raft_core::RaftConfig;
use raft_storage::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};
use crate::wire::MESSAGE_HEADER_SIZE;

/// framing and queueing limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// largest payload of one chunk, in both directions
    pub max_chunk_payload: usize,
    /// largest reassembled message content
    pub max_message_bytes: usize,
    /// messages queued for the consensus worker before readers wait
    pub inbound_queue_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk_payload: 64 * 1024,
            max_message_bytes: 64 * 1024 * 1024,
            inbound_queue_depth: 1024,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> TransportResult<()> {
        if self.max_chunk_payload < MESSAGE_HEADER_SIZE {
            return Err(TransportError::Config(format!(
                "max_chunk_payload {} is below the {MESSAGE_HEADER_SIZE} byte message header",
                self.max_chunk_payload
            )));
        }
        if self.max_message_bytes < self.max_chunk_payload {
            return Err(TransportError::Config(format!(
                "max_message_bytes {} is below max_chunk_payload {}",
                self.max_message_bytes, self.max_chunk_payload
            )));
        }
        if self.inbound_queue_depth == 0 {
            return Err(TransportError::Config("inbound_queue_depth must be positive".into()));
        }
        Ok(())
    }
}

/// everything tunable about one raft group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub raft: RaftConfig,
    pub storage: StorageConfig,
    pub transport: TransportConfig,
}

impl GroupConfig {
    /// load and validate; missing sections and fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> TransportResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: GroupConfig = serde_json::from_str(&text).map_err(|e| {
            TransportError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TransportResult<()> {
        self.raft.validate()?;
        self.storage.validate()?;
        self.transport.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        assert!(GroupConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("group.json");
        fs::write(
            &path,
            r#"{ "raft": { "pre_vote": true }, "transport": { "max_chunk_payload": 4096 } }"#,
        )
        .unwrap();

        let config = GroupConfig::from_json_file(&path).unwrap();

        assert!(config.raft.pre_vote);
        assert_eq!(config.raft.heartbeat_interval, 50);
        assert_eq!(config.transport.max_chunk_payload, 4096);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn invalid_section_fails_the_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("group.json");
        fs::write(&path, r#"{ "storage": { "segment_size_bytes": 1 } }"#).unwrap();

        assert!(matches!(GroupConfig::from_json_file(&path), Err(TransportError::Storage(_))));
    }

    #[test]
    fn tiny_chunks_are_rejected() {
        let config = TransportConfig { max_chunk_payload: 8, ..TransportConfig::default() };
        assert!(matches!(config.validate(), Err(TransportError::Config(_))));
    }
}
