//! # error
//!
//! why: give every component boundary (log, cache, apply step) a typed failure channel
//! relations: returned by log.rs, command.rs and node.rs; wrapped by raft-storage and raft-transport
//! what: RaftError enum and the crate-wide Result alias

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::log::LogIndex;

/// Hard failures of the consensus core.
///
/// Expected protocol outcomes (stale terms, diverging logs) are not errors;
/// they are resolved by the role handlers and show up in an `Outcome`.
#[derive(Debug, Error)]
pub enum RaftError {
    /// An append did not continue the log from where it currently ends.
    #[error("log conflict: expected prior index {expected}, log append index is {actual}")]
    LogConflict { expected: LogIndex, actual: LogIndex },

    /// The requested index is not held by the log.
    #[error("no entry at index {index}")]
    NotFound { index: LogIndex },

    /// Truncation would open a gap past the end of the log.
    #[error("cannot truncate from {from}: append index is {append_index}")]
    TruncateBeyondAppend { from: LogIndex, append_index: LogIndex },

    /// Truncation would remove an entry that is already committed.
    #[error("cannot truncate from {from}: entries up to {commit_index} are committed")]
    TruncateCommitted { from: LogIndex, commit_index: LogIndex },

    /// Truncation would reach into the pruned prefix.
    #[error("cannot truncate from {from}: entries up to {prev_index} are pruned")]
    TruncatePruned { from: LogIndex, prev_index: LogIndex },

    /// The commit index only ever moves forward.
    #[error("commit index cannot move from {current} back to {requested}")]
    CommitIndexRegression { current: LogIndex, requested: LogIndex },

    /// The commit index cannot point past the last appended entry.
    #[error("commit index {requested} is beyond append index {append_index}")]
    CommitBeyondAppend { requested: LogIndex, append_index: LogIndex },

    /// Durable I/O failed.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// On-disk state cannot be interpreted; the group must not start.
    #[error("corrupted cluster state: {0}")]
    Corrupted(String),

    /// Cluster state is held by a running raft group.
    #[error("cluster state at {} is locked by an active raft group", .0.display())]
    StoreLocked(PathBuf),

    /// Repeated durability failures took this raft group out of service.
    #[error("raft group unavailable after {failures} consecutive durability failures")]
    Unavailable { failures: u32 },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;

impl RaftError {
    /// Whether this failure came from durable storage rather than from the caller.
    pub fn is_durability_failure(&self) -> bool {
        matches!(self, RaftError::Io(_) | RaftError::Corrupted(_))
    }
}
