//! # error
//!
//! why: a misbehaving peer must be rejected at the framing boundary without touching consensus state
//! relations: returned by chunk.rs, composer.rs, fragmenter.rs and pipeline.rs; wrapped by TransportError in connection.rs and runtime.rs
//! what: ProtocolError, TransportError

use std::io;

use raft_core::{ClusterId, RaftError};
use thiserror::Error;

/// violations of the wire protocol, all connection-level
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// a chunk or header that cannot be interpreted
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// a chunk announced a payload above the configured bound
    #[error("chunk payload of {actual} bytes exceeds maximum {max}")]
    PayloadTooLarge { actual: usize, max: usize },

    /// reassembly grew past the configured message bound
    #[error("message of {actual} bytes exceeds maximum {max}")]
    MessageTooLarge { actual: usize, max: usize },

    #[error("Pipeline already contains message header waiting to build")]
    ComposerStateConflict,

    /// contents left over once a message was built
    #[error("{leftover} message contents left unread after composing a message")]
    ComposerResourceLeak { leftover: usize },

    #[error("message for cluster {received} rejected by cluster {local}")]
    ClusterIdMismatch { local: ClusterId, received: ClusterId },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("message envelope could not be encoded or decoded: {0}")]
    Envelope(#[from] bincode::Error),
}

/// failures of a connection or of the group runtime
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("raft failure: {0}")]
    Raft(#[from] RaftError),

    #[error("storage failure: {0}")]
    Storage(#[from] raft_storage::StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// the consensus worker is gone
    #[error("raft group worker has stopped")]
    WorkerStopped,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
