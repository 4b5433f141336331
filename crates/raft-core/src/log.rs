//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: mutated only through command.rs, read by the role handlers, persisted via raft-storage
//! what: Term/LogIndex, RaftLogEntry, the ReadableRaftLog/RaftLog contract, InMemoryRaftLog

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Election epoch counter.
pub type Term = u64;

/// Zero-based position in the replicated log.
///
/// Signed so that `NO_INDEX` can name the slot before the first entry.
pub type LogIndex = i64;

/// Index of "nothing": append index of an empty log, initial commit index.
pub const NO_INDEX: LogIndex = -1;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLogEntry {
    /// The term when this entry was proposed
    pub term: Term,
    /// Opaque replicated command bytes; empty for a leader barrier
    pub content: Vec<u8>,
}

impl RaftLogEntry {
    /// Create a new log entry
    pub fn new(term: Term, content: Vec<u8>) -> Self {
        Self { term, content }
    }

    /// The no-op entry a new leader appends in its own term.
    pub fn barrier(term: Term) -> Self {
        Self { term, content: Vec::new() }
    }

    pub fn is_barrier(&self) -> bool {
        self.content.is_empty()
    }

    /// Approximate memory footprint, used for the in-flight cache budget.
    pub fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Term>() + self.content.len()
    }
}

/// Read side of the replicated log.
///
/// The role handlers only ever see this half, which keeps them free of
/// side effects.
pub trait ReadableRaftLog {
    /// Index of the last entry, `NO_INDEX` when nothing was ever appended.
    fn append_index(&self) -> LogIndex;

    /// Last index removed by pruning or skipping, `NO_INDEX` if none.
    fn prev_index(&self) -> LogIndex;

    /// Highest index known to be durable on a majority.
    fn commit_index(&self) -> LogIndex;

    /// Term of the entry at `index`.
    ///
    /// Known for `prev_index() ..= append_index()`; `None` outside that range.
    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>>;

    /// The entry at `index`, or `NotFound` outside `prev_index() + 1 ..= append_index()`.
    fn read_entry(&self, index: LogIndex) -> Result<RaftLogEntry>;

    /// Term of the last entry (or of the pruned prefix for an empty tail).
    fn last_entry_term(&self) -> Result<Term> {
        Ok(self.read_entry_term(self.append_index())?.unwrap_or(0))
    }

    /// Up to `max` consecutive entries starting at `from`.
    fn read_entries(&self, from: LogIndex, max: usize) -> Result<Vec<RaftLogEntry>> {
        let mut entries = Vec::new();
        let mut index = from;
        while index <= self.append_index() && entries.len() < max {
            entries.push(self.read_entry(index)?);
            index += 1;
        }
        Ok(entries)
    }
}

/// The durable, append-only, truncatable replicated log.
///
/// Every mutating call must be durable before it returns.
pub trait RaftLog: ReadableRaftLog {
    /// Append `entries` right after `expected_prior_index`; returns the new append index.
    fn append(&mut self, entries: &[RaftLogEntry], expected_prior_index: LogIndex) -> Result<LogIndex>;

    /// Remove every entry at or after `from_index`.
    fn truncate(&mut self, from_index: LogIndex) -> Result<()>;

    /// Move the commit index forward to `new_index`.
    fn advance_commit_index(&mut self, new_index: LogIndex) -> Result<()>;

    /// Drop a committed prefix up to `safe_index`; returns the resulting prev index.
    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex>;

    /// Continue the log after `index` (with `term`), discarding anything older.
    fn skip(&mut self, index: LogIndex, term: Term) -> Result<()>;

    /// Release file handles; the log must not be used afterwards.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared precondition checks so every log implementation fails the same way.
pub mod checks {
    use super::*;

    pub fn append(log: &dyn ReadableRaftLog, expected_prior_index: LogIndex) -> Result<()> {
        if expected_prior_index != log.append_index() {
            return Err(RaftError::LogConflict {
                expected: expected_prior_index,
                actual: log.append_index(),
            });
        }
        Ok(())
    }

    pub fn truncate(log: &dyn ReadableRaftLog, from: LogIndex) -> Result<()> {
        if from > log.append_index() + 1 {
            return Err(RaftError::TruncateBeyondAppend { from, append_index: log.append_index() });
        }
        if from <= log.commit_index() {
            return Err(RaftError::TruncateCommitted { from, commit_index: log.commit_index() });
        }
        if from <= log.prev_index() {
            return Err(RaftError::TruncatePruned { from, prev_index: log.prev_index() });
        }
        Ok(())
    }

    pub fn commit(log: &dyn ReadableRaftLog, new_index: LogIndex) -> Result<()> {
        if new_index < log.commit_index() {
            return Err(RaftError::CommitIndexRegression {
                current: log.commit_index(),
                requested: new_index,
            });
        }
        if new_index > log.append_index() {
            return Err(RaftError::CommitBeyondAppend {
                requested: new_index,
                append_index: log.append_index(),
            });
        }
        Ok(())
    }
}

// -- in-memory implementation --

/// in-memory log for tests and for members that keep no durable state
///
/// `entries[i]` sits at index `prev_index + 1 + i`.
#[derive(Debug, Clone)]
pub struct InMemoryRaftLog {
    entries: Vec<RaftLogEntry>,
    prev_index: LogIndex,
    prev_term: Term,
    commit_index: LogIndex,
}

impl Default for InMemoryRaftLog {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            prev_index: NO_INDEX,
            prev_term: 0,
            commit_index: NO_INDEX,
        }
    }
}

impl InMemoryRaftLog {
    /// create an empty in-memory log
    pub fn new() -> Self {
        Self::default()
    }

    fn offset(&self, index: LogIndex) -> usize {
        (index - self.prev_index - 1) as usize
    }
}

impl ReadableRaftLog for InMemoryRaftLog {
    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as LogIndex
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>> {
        if index == self.prev_index {
            return Ok(Some(self.prev_term));
        }
        if index < self.prev_index || index > self.append_index() {
            return Ok(None);
        }
        Ok(Some(self.entries[self.offset(index)].term))
    }

    fn read_entry(&self, index: LogIndex) -> Result<RaftLogEntry> {
        if index <= self.prev_index || index > self.append_index() {
            return Err(RaftError::NotFound { index });
        }
        Ok(self.entries[self.offset(index)].clone())
    }
}

impl RaftLog for InMemoryRaftLog {
    fn append(&mut self, entries: &[RaftLogEntry], expected_prior_index: LogIndex) -> Result<LogIndex> {
        checks::append(&*self, expected_prior_index)?;
        self.entries.extend(entries.iter().cloned());
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        checks::truncate(&*self, from_index)?;
        let keep = self.offset(from_index);
        self.entries.truncate(keep);
        Ok(())
    }

    fn advance_commit_index(&mut self, new_index: LogIndex) -> Result<()> {
        checks::commit(&*self, new_index)?;
        self.commit_index = new_index;
        Ok(())
    }

    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex> {
        let limit = safe_index.min(self.commit_index);
        if limit <= self.prev_index {
            return Ok(self.prev_index);
        }
        let last = self.offset(limit);
        let removed: Vec<RaftLogEntry> = self.entries.drain(..=last).collect();
        if let Some(last) = removed.last() {
            self.prev_term = last.term;
        }
        self.prev_index = limit;
        Ok(self.prev_index)
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<()> {
        if index > self.append_index() {
            self.entries.clear();
            self.prev_index = index;
            self.prev_term = term;
            self.commit_index = self.commit_index.max(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, value: u8) -> RaftLogEntry {
        RaftLogEntry::new(term, vec![value])
    }

    #[test]
    fn empty_log_has_no_index() {
        let log = InMemoryRaftLog::new();
        assert_eq!(log.append_index(), NO_INDEX);
        assert_eq!(log.commit_index(), NO_INDEX);
        assert_eq!(log.last_entry_term().unwrap(), 0);
    }

    #[test]
    fn append_requires_matching_prior_index() {
        let mut log = InMemoryRaftLog::new();
        log.append(&[entry(1, 1)], NO_INDEX).unwrap();

        let err = log.append(&[entry(1, 2)], 5).unwrap_err();
        assert!(matches!(err, RaftError::LogConflict { expected: 5, actual: 0 }));
        assert_eq!(log.append_index(), 0);
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut log = InMemoryRaftLog::new();
        log.append(&[entry(1, 1)], NO_INDEX).unwrap();

        assert!(log.truncate(1).is_ok());
        assert!(matches!(log.truncate(3), Err(RaftError::TruncateBeyondAppend { .. })));
    }

    #[test]
    fn commit_index_is_monotonic() {
        let mut log = InMemoryRaftLog::new();
        log.append(&[entry(1, 1), entry(1, 2)], NO_INDEX).unwrap();
        log.advance_commit_index(1).unwrap();

        assert!(matches!(
            log.advance_commit_index(0),
            Err(RaftError::CommitIndexRegression { current: 1, requested: 0 })
        ));
    }

    #[test]
    fn prune_keeps_prev_term() {
        let mut log = InMemoryRaftLog::new();
        log.append(&[entry(1, 1), entry(2, 2), entry(3, 3)], NO_INDEX).unwrap();
        log.advance_commit_index(2).unwrap();

        assert_eq!(log.prune(1).unwrap(), 1);
        assert_eq!(log.read_entry_term(1).unwrap(), Some(2));
        assert!(matches!(log.read_entry(1), Err(RaftError::NotFound { index: 1 })));
        assert_eq!(log.read_entry(2).unwrap(), entry(3, 3));
    }
}
