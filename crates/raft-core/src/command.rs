//! # command
//!
//! why: turn the decisions of the role handlers into one ordered, atomic mutation of log + cache
//! relations: produced inside outcome.rs by the roles, applied by node.rs
//! what: the closed RaftLogCommand set and its apply_to

use std::sync::Arc;

use tracing::debug;

use crate::cache::InFlightCache;
use crate::error::Result;
use crate::log::{LogIndex, RaftLog, RaftLogEntry};

/// Every way the consensus core may mutate its log and in-flight cache.
///
/// The durable log is written first; the cache only follows once that write
/// returned successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftLogCommand {
    /// Leader appends a single proposal at `index`.
    Append { index: LogIndex, entry: RaftLogEntry },
    /// Append `entries[offset..]` at `base_index + offset`; the first `offset`
    /// entries are already in the log.
    BatchAppend {
        base_index: LogIndex,
        offset: usize,
        entries: Vec<RaftLogEntry>,
    },
    /// Discard the diverging suffix starting at `from_index`.
    Truncate { from_index: LogIndex },
    /// Advance the commit index without touching entries.
    CommitIndexUpdate { new_index: LogIndex },
    /// Compact the log up to `prune_index`.
    Prune { prune_index: LogIndex },
    /// Cache-only eviction of entries at or below `up_to`.
    EvictInFlight { up_to: LogIndex },
}

impl RaftLogCommand {
    pub fn apply_to(&self, log: &mut dyn RaftLog, cache: &mut InFlightCache) -> Result<()> {
        match self {
            RaftLogCommand::Append { index, entry } => {
                log.append(std::slice::from_ref(entry), index - 1)?;
                cache.put(*index, Arc::new(entry.clone()));
            }
            RaftLogCommand::BatchAppend { base_index, offset, entries } => {
                let fresh = entries.get(*offset..).unwrap_or_default();
                if fresh.is_empty() {
                    return Ok(());
                }
                let first = base_index + *offset as LogIndex;
                log.append(fresh, first - 1)?;
                for (i, entry) in fresh.iter().enumerate() {
                    cache.put(first + i as LogIndex, Arc::new(entry.clone()));
                }
            }
            RaftLogCommand::Truncate { from_index } => {
                debug!(
                    from_index,
                    cache = ?cache.snapshot(),
                    "truncating log and in-flight cache"
                );
                log.truncate(*from_index)?;
                cache.truncate(*from_index);
            }
            RaftLogCommand::CommitIndexUpdate { new_index } => {
                if *new_index > log.commit_index() {
                    log.advance_commit_index(*new_index)?;
                }
            }
            RaftLogCommand::Prune { prune_index } => {
                let prev_index = log.prune(*prune_index)?;
                cache.prune(prev_index);
            }
            RaftLogCommand::EvictInFlight { up_to } => cache.prune(*up_to),
        }
        Ok(())
    }
}
