//! # cache
//!
//! why: serve the hot tail of the log from memory so replication reads skip the disk
//! relations: filled and trimmed by command.rs, consulted through CachedLogReader by node.rs
//! what: InFlightCache (bounded, consecutive index range) and CachedLogReader

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::Result;
use crate::log::{LogIndex, RaftLogEntry, ReadableRaftLog, Term, NO_INDEX};

/// Summary of the cache contents, logged when the cache is trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub first_index: LogIndex,
    pub last_index: LogIndex,
    pub entries: usize,
    pub bytes: usize,
}

/// Memory mirror of the most recent log entries.
///
/// Invariant: the cached indices always form one unbroken run
/// `first_index ..= first_index + len - 1`. The log stays authoritative; a miss
/// simply means "ask the log".
#[derive(Debug)]
pub struct InFlightCache {
    entries: VecDeque<Arc<RaftLogEntry>>,
    first_index: LogIndex,
    total_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl InFlightCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            first_index: NO_INDEX,
            total_bytes: 0,
            max_entries,
            max_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Highest cached index, `NO_INDEX` when empty.
    pub fn last_index(&self) -> LogIndex {
        if self.entries.is_empty() {
            NO_INDEX
        } else {
            self.first_index + self.entries.len() as LogIndex - 1
        }
    }

    /// Lowest cached index, `NO_INDEX` when empty.
    pub fn first_index(&self) -> LogIndex {
        if self.entries.is_empty() {
            NO_INDEX
        } else {
            self.first_index
        }
    }

    /// O(1) lookup. The returned handle stays valid even if the entry is evicted meanwhile.
    pub fn get(&self, index: LogIndex) -> Option<Arc<RaftLogEntry>> {
        if self.entries.is_empty() || index < self.first_index {
            return None;
        }
        self.entries.get((index - self.first_index) as usize).cloned()
    }

    /// Insert `entry` at `index`.
    ///
    /// Anything other than the index right after the current tail clears the
    /// cache first, so a gap can never form.
    pub fn put(&mut self, index: LogIndex, entry: Arc<RaftLogEntry>) {
        if !self.entries.is_empty() && index != self.last_index() + 1 {
            self.clear();
        }
        if self.entries.is_empty() {
            self.first_index = index;
        }
        self.total_bytes += entry.size_in_bytes();
        self.entries.push_back(entry);
        self.evict_if_over_capacity();
    }

    /// Remove every cached entry at or above `from_index`.
    pub fn truncate(&mut self, from_index: LogIndex) {
        while !self.entries.is_empty() && self.last_index() >= from_index {
            if let Some(entry) = self.entries.pop_back() {
                self.total_bytes -= entry.size_in_bytes();
            }
        }
    }

    /// Remove every cached entry at or below `up_to`.
    pub fn prune(&mut self, up_to: LogIndex) {
        while !self.entries.is_empty() && self.first_index <= up_to {
            self.pop_oldest();
        }
    }

    /// Drop the oldest entries until both budgets hold again.
    pub fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.max_entries
            || (self.total_bytes > self.max_bytes && !self.entries.is_empty())
        {
            self.pop_oldest();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.first_index = NO_INDEX;
        self.total_bytes = 0;
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            first_index: self.first_index(),
            last_index: self.last_index(),
            entries: self.entries.len(),
            bytes: self.total_bytes,
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.total_bytes -= entry.size_in_bytes();
            self.first_index += 1;
        }
        if self.entries.is_empty() {
            self.first_index = NO_INDEX;
        }
    }
}

/// Read view that answers from the cache first and falls back to the log.
pub struct CachedLogReader<'a> {
    cache: &'a InFlightCache,
    log: &'a dyn ReadableRaftLog,
}

impl<'a> CachedLogReader<'a> {
    pub fn new(cache: &'a InFlightCache, log: &'a dyn ReadableRaftLog) -> Self {
        Self { cache, log }
    }
}

impl ReadableRaftLog for CachedLogReader<'_> {
    fn append_index(&self) -> LogIndex {
        self.log.append_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.log.prev_index()
    }

    fn commit_index(&self) -> LogIndex {
        self.log.commit_index()
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>> {
        match self.cache.get(index) {
            Some(entry) => Ok(Some(entry.term)),
            None => self.log.read_entry_term(index),
        }
    }

    fn read_entry(&self, index: LogIndex) -> Result<RaftLogEntry> {
        match self.cache.get(index) {
            Some(entry) => Ok(RaftLogEntry::clone(&entry)),
            None => self.log.read_entry(index),
        }
    }
}
