//! # error
//!
//! why: name the ways on-disk cluster state can fail before they reach the consensus core
//! relations: returned by segment.rs, segmented_log.rs and directory.rs; converted into RaftError at the RaftLog boundary
//! what: StorageError enum

use std::io;
use std::path::PathBuf;

use raft_core::RaftError;
use thiserror::Error;

/// failures of the durable cluster state
#[derive(Debug, Error)]
pub enum StorageError {
    /// the filesystem refused a read or write
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// a file exists but cannot be interpreted
    #[error("corrupted {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },

    /// another raft group holds the store lock
    #[error("cluster state at {} is locked by an active raft group", .0.display())]
    Locked(PathBuf),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// the log was closed and no longer holds file handles
    #[error("log at {} is closed", .0.display())]
    Closed(PathBuf),
}

impl StorageError {
    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted { path: path.into(), reason: reason.into() }
    }
}

impl From<StorageError> for RaftError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => RaftError::Io(e),
            StorageError::Corrupted { path, reason } => {
                RaftError::Corrupted(format!("{}: {reason}", path.display()))
            }
            StorageError::Locked(path) => RaftError::StoreLocked(path),
            StorageError::InvalidConfig(reason) => RaftError::InvalidConfig(reason),
            StorageError::Closed(path) => RaftError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("log at {} is closed", path.display()),
            )),
        }
    }
}
