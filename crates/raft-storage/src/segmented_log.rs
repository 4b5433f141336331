//! # segmented_log
//!
//! why: the replicated log must survive crashes and be cheap to compact
//! relations: implements raft_core::RaftLog on top of segment.rs; commit marker via persist.rs; may own a directory::StoreLock
//! what: SegmentedRaftLog with open/recovery, rotation, truncation, pruning and skipping
//!
//! Only the newest segment is written to. Older segments are immutable until
//! they are removed as a whole by `prune` or `skip`. Record positions and terms
//! are kept in memory; contents are read back from disk on demand.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use raft_core::log::checks;
use raft_core::{LogIndex, RaftLog, RaftLogEntry, ReadableRaftLog, Result, Term, NO_INDEX};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::directory::StoreLock;
use crate::error::StorageError;
use crate::persist;
use crate::segment::{self, Decoded, SegmentHeader, HEADER_SIZE, RECORD_HEADER_SIZE};

pub(crate) const COMMIT_STATE_FILE: &str = "commit.state";

/// on-disk commit marker
#[derive(Serialize, Deserialize)]
struct CommitState {
    commit_index: LogIndex,
}

/// log shape before a batch append, for rolling it back
#[derive(Debug, Clone, Copy)]
struct AppendMark {
    segments: usize,
    records: usize,
    size: u64,
}

/// where a record lives inside its segment
#[derive(Debug, Clone, Copy)]
struct RecordPos {
    offset: u64,
    content_len: usize,
    term: Term,
}

impl RecordPos {
    fn size(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.content_len) as u64
    }
}

#[derive(Debug)]
struct Segment {
    number: u64,
    path: PathBuf,
    file: Option<File>,
    base_index: LogIndex,
    prev_term: Term,
    records: Vec<RecordPos>,
    size: u64,
}

impl Segment {
    /// index of the last record, `base_index - 1` when empty
    fn last_index(&self) -> LogIndex {
        self.base_index + self.records.len() as LogIndex - 1
    }

    fn last_term(&self) -> Term {
        self.records.last().map_or(self.prev_term, |r| r.term)
    }

    fn file(&self) -> std::result::Result<&File, StorageError> {
        self.file.as_ref().ok_or_else(|| StorageError::Closed(self.path.clone()))
    }

    /// create an empty segment; the header is written through a temp file so
    /// a crash never leaves a segment without one
    fn create(
        dir: &Path,
        number: u64,
        header: SegmentHeader,
        fsync: bool,
    ) -> std::result::Result<Self, StorageError> {
        let name = segment::segment_file_name(number);
        let path = dir.join(&name);
        let temp_path = dir.join(format!("{name}.tmp"));

        let mut temp = File::create(&temp_path)?;
        temp.write_all(&header.encode()?)?;
        if fsync {
            temp.sync_all()?;
        }
        drop(temp);
        fs::rename(&temp_path, &path)?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(segment = number, base_index = header.base_index, "created log segment");
        Ok(Self {
            number,
            path,
            file: Some(file),
            base_index: header.base_index,
            prev_term: header.prev_term,
            records: Vec::new(),
            size: HEADER_SIZE as u64,
        })
    }

    /// scan an existing segment; a torn tail is cut off only when `newest`
    fn load(number: u64, path: PathBuf, newest: bool) -> std::result::Result<Self, StorageError> {
        let bytes = fs::read(&path)?;
        let header = SegmentHeader::decode(&bytes)
            .map_err(|reason| StorageError::corrupted(&path, reason))?;

        let mut records = Vec::new();
        let mut offset = HEADER_SIZE;
        let mut torn = false;
        while offset < bytes.len() {
            match segment::decode_record(&bytes[offset..])? {
                Decoded::Record { index, entry, size } => {
                    let expected = header.base_index + records.len() as LogIndex;
                    if index != expected {
                        return Err(StorageError::corrupted(
                            &path,
                            format!("record at offset {offset} has index {index}, expected {expected}"),
                        ));
                    }
                    records.push(RecordPos {
                        offset: offset as u64,
                        content_len: entry.content.len(),
                        term: entry.term,
                    });
                    offset += size;
                }
                Decoded::Incomplete if newest => {
                    torn = true;
                    break;
                }
                Decoded::ChecksumMismatch { size } if newest && offset + size == bytes.len() => {
                    torn = true;
                    break;
                }
                Decoded::Incomplete => {
                    return Err(StorageError::corrupted(
                        &path,
                        format!("incomplete record at offset {offset} in a sealed segment"),
                    ));
                }
                Decoded::ChecksumMismatch { .. } => {
                    return Err(StorageError::corrupted(
                        &path,
                        format!("checksum mismatch at offset {offset}"),
                    ));
                }
            }
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if torn {
            warn!(
                segment = number,
                valid_bytes = offset,
                discarded_bytes = bytes.len() - offset,
                "truncating torn record at the end of the log"
            );
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            number,
            path,
            file: Some(file),
            base_index: header.base_index,
            prev_term: header.prev_term,
            records,
            size: offset as u64,
        })
    }

    /// read and verify the record at `index`
    fn read(&self, index: LogIndex) -> std::result::Result<RaftLogEntry, StorageError> {
        let pos = self.records[(index - self.base_index) as usize];
        let mut file = self.file()?;
        let mut buf = vec![0u8; pos.size() as usize];
        file.seek(SeekFrom::Start(pos.offset))?;
        file.read_exact(&mut buf)?;

        match segment::decode_record(&buf)? {
            Decoded::Record { index: found, entry, .. } if found == index => Ok(entry),
            Decoded::Record { index: found, .. } => Err(StorageError::corrupted(
                &self.path,
                format!("expected index {index} at offset {}, found {found}", pos.offset),
            )),
            Decoded::Incomplete | Decoded::ChecksumMismatch { .. } => Err(StorageError::corrupted(
                &self.path,
                format!("record {index} at offset {} no longer verifies", pos.offset),
            )),
        }
    }

    /// drop records from position `keep` on
    fn truncate_records(&mut self, keep: usize, fsync: bool) -> std::result::Result<(), StorageError> {
        let new_size = self.records.get(keep).map_or(self.size, |r| r.offset);
        let file = self.file()?;
        file.set_len(new_size)?;
        if fsync {
            file.sync_data()?;
        }
        self.records.truncate(keep);
        self.size = new_size;
        Ok(())
    }

    fn remove(self) -> std::result::Result<(), StorageError> {
        drop(self.file);
        fs::remove_file(&self.path)?;
        debug!(segment = self.number, "removed log segment");
        Ok(())
    }
}

/// durable replicated log stored as a sequence of segment files
///
/// layout under `dir`: `segment.<n>` files plus the `commit.state` marker
#[derive(Debug)]
pub struct SegmentedRaftLog {
    dir: PathBuf,
    config: StorageConfig,
    /// ordered by index; never empty while open, the last one is active
    segments: Vec<Segment>,
    commit_index: LogIndex,
    closed: bool,
    lock: Option<StoreLock>,
}

impl SegmentedRaftLog {
    /// open the log at `dir`, creating it when empty and recovering otherwise
    pub fn open(dir: impl Into<PathBuf>, config: StorageConfig) -> std::result::Result<Self, StorageError> {
        config.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut numbers = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if let Some(number) = segment::parse_segment_file_name(&name) {
                numbers.push(number);
            } else if name.ends_with(".tmp") {
                warn!(file = %name, "removing leftover temp file");
                fs::remove_file(dir_entry.path())?;
            }
        }
        numbers.sort_unstable();

        let mut segments: Vec<Segment> = Vec::with_capacity(numbers.len().max(1));
        let count = numbers.len();
        for (i, number) in numbers.into_iter().enumerate() {
            let path = dir.join(segment::segment_file_name(number));
            let loaded = Segment::load(number, path, i + 1 == count)?;

            if let Some(previous) = segments.last() {
                let expected = previous.last_index() + 1;
                if loaded.base_index > expected {
                    // an interrupted skip: the newer segment supersedes everything before it
                    warn!(
                        segment = number,
                        base_index = loaded.base_index,
                        expected,
                        "discarding segments superseded by a skip"
                    );
                    for stale in segments.drain(..) {
                        stale.remove()?;
                    }
                } else if loaded.base_index < expected {
                    return Err(StorageError::corrupted(
                        &loaded.path,
                        format!("segment starts at {} but the log continues at {expected}", loaded.base_index),
                    ));
                } else if loaded.prev_term != previous.last_term() {
                    return Err(StorageError::corrupted(
                        &loaded.path,
                        format!(
                            "segment expects previous term {} but the log ends with term {}",
                            loaded.prev_term,
                            previous.last_term()
                        ),
                    ));
                }
            }
            segments.push(loaded);
        }

        if segments.is_empty() {
            let header = SegmentHeader { base_index: 0, prev_term: 0 };
            segments.push(Segment::create(&dir, 0, header, config.fsync)?);
        }

        let mut log = Self {
            dir,
            config,
            segments,
            commit_index: NO_INDEX,
            closed: false,
            lock: None,
        };

        let marker: Option<CommitState> = persist::read_json(&log.commit_state_path())?;
        let commit_index = marker.map_or(NO_INDEX, |m| m.commit_index);
        if commit_index > log.append_index() {
            return Err(StorageError::corrupted(
                log.commit_state_path(),
                format!("commit index {commit_index} is beyond append index {}", log.append_index()),
            ));
        }
        log.commit_index = commit_index.max(log.prev_index());

        info!(
            dir = %log.dir.display(),
            segments = log.segments.len(),
            prev_index = log.prev_index(),
            append_index = log.append_index(),
            commit_index = log.commit_index,
            "opened raft log"
        );
        Ok(log)
    }

    /// hand ownership of the store lock to the log, released on close
    pub fn with_lock(mut self, lock: StoreLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn commit_state_path(&self) -> PathBuf {
        self.dir.join(COMMIT_STATE_FILE)
    }

    fn ensure_open(&self) -> std::result::Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed(self.dir.clone()));
        }
        Ok(())
    }

    fn first(&self) -> &Segment {
        &self.segments[0]
    }

    fn active(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// position in `segments` of the segment holding (or about to hold) `index`
    fn segment_for(&self, index: LogIndex) -> usize {
        self.segments.partition_point(|s| s.base_index <= index).saturating_sub(1)
    }

    fn rotate(&mut self) -> std::result::Result<(), StorageError> {
        let active = self.active();
        if self.config.fsync {
            active.file()?.sync_data()?;
        }
        let header = SegmentHeader {
            base_index: active.last_index() + 1,
            prev_term: active.last_term(),
        };
        let number = active.number + 1;
        let segment = Segment::create(&self.dir, number, header, self.config.fsync)?;
        debug!(segment = number, base_index = header.base_index, "rotated raft log segment");
        self.segments.push(segment);
        Ok(())
    }

    fn write_record(&mut self, index: LogIndex, entry: &RaftLogEntry) -> std::result::Result<(), StorageError> {
        let record = segment::encode_record(index, entry)?;
        let active = self.active();
        if !active.records.is_empty() && active.size + record.len() as u64 > self.config.segment_size_bytes {
            self.rotate()?;
        }

        let last = self.segments.len() - 1;
        let active = &mut self.segments[last];
        let offset = active.size;
        let mut file = active.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&record)?;

        active.records.push(RecordPos { offset, content_len: entry.content.len(), term: entry.term });
        active.size += record.len() as u64;
        Ok(())
    }

    fn write_batch(
        &mut self,
        entries: &[RaftLogEntry],
        expected_prior_index: LogIndex,
    ) -> std::result::Result<(), StorageError> {
        let first_segment = self.segments.len() - 1;
        for (i, entry) in entries.iter().enumerate() {
            self.write_record(expected_prior_index + 1 + i as LogIndex, entry)?;
        }
        if self.config.fsync {
            // rotation already synced the sealed segments
            for segment in &self.segments[first_segment..] {
                segment.file()?.sync_data()?;
            }
        }
        Ok(())
    }

    fn mark(&self) -> AppendMark {
        let active = self.active();
        AppendMark {
            segments: self.segments.len(),
            records: active.records.len(),
            size: active.size,
        }
    }

    /// undo a partially written batch: drop segments rotated in since `mark`
    /// and cut the active segment back to its old length
    fn roll_back(&mut self, mark: AppendMark) {
        while self.segments.len() > mark.segments {
            if let Some(rotated) = self.segments.pop() {
                let number = rotated.number;
                if let Err(err) = rotated.remove() {
                    warn!(segment = number, error = %err, "could not remove segment of a failed append");
                }
            }
        }

        let active = &mut self.segments[mark.segments - 1];
        active.records.truncate(mark.records);
        active.size = mark.size;
        let cut = match active.file() {
            Ok(file) => file
                .set_len(mark.size)
                .and_then(|_| file.sync_data())
                .map_err(StorageError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = cut {
            warn!(segment = active.number, error = %err, "could not cut back a failed append");
        }
    }

    fn write_commit_state(&self, commit_index: LogIndex) -> std::result::Result<(), StorageError> {
        persist::write_json_atomic(
            &self.dir,
            COMMIT_STATE_FILE,
            &CommitState { commit_index },
            self.config.fsync,
        )?;
        Ok(())
    }
}

impl ReadableRaftLog for SegmentedRaftLog {
    fn append_index(&self) -> LogIndex {
        self.active().last_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.first().base_index - 1
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Option<Term>> {
        if index == self.prev_index() {
            return Ok(Some(self.first().prev_term));
        }
        if index < self.prev_index() || index > self.append_index() {
            return Ok(None);
        }
        let segment = &self.segments[self.segment_for(index)];
        Ok(Some(segment.records[(index - segment.base_index) as usize].term))
    }

    fn read_entry(&self, index: LogIndex) -> Result<RaftLogEntry> {
        self.ensure_open()?;
        if index <= self.prev_index() || index > self.append_index() {
            return Err(raft_core::RaftError::NotFound { index });
        }
        Ok(self.segments[self.segment_for(index)].read(index)?)
    }
}

impl RaftLog for SegmentedRaftLog {
    fn append(&mut self, entries: &[RaftLogEntry], expected_prior_index: LogIndex) -> Result<LogIndex> {
        self.ensure_open()?;
        checks::append(&*self, expected_prior_index)?;
        if entries.is_empty() {
            return Ok(self.append_index());
        }

        let mark = self.mark();
        if let Err(err) = self.write_batch(entries, expected_prior_index) {
            self.roll_back(mark);
            warn!(expected_prior_index, entries = entries.len(), error = %err, "append failed, batch discarded");
            return Err(err.into());
        }
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        self.ensure_open()?;
        checks::truncate(&*self, from_index)?;

        let keep = self.segment_for(from_index);
        while self.segments.len() > keep + 1 {
            if let Some(later) = self.segments.pop() {
                later.remove()?;
            }
        }
        let fsync = self.config.fsync;
        let segment = &mut self.segments[keep];
        let position = (from_index - segment.base_index) as usize;
        segment.truncate_records(position, fsync)?;

        debug!(from_index, append_index = self.append_index(), "truncated raft log");
        Ok(())
    }

    fn advance_commit_index(&mut self, new_index: LogIndex) -> Result<()> {
        self.ensure_open()?;
        checks::commit(&*self, new_index)?;
        if new_index == self.commit_index {
            return Ok(());
        }
        self.write_commit_state(new_index)?;
        self.commit_index = new_index;
        Ok(())
    }

    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex> {
        self.ensure_open()?;
        let limit = safe_index.min(self.commit_index);

        let mut removed = 0;
        while self.segments.len() > 1
            && !self.segments[0].records.is_empty()
            && self.segments[0].last_index() <= limit
        {
            self.segments.remove(0).remove()?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, prev_index = self.prev_index(), "pruned raft log");
        }
        Ok(self.prev_index())
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<()> {
        self.ensure_open()?;
        if index <= self.append_index() {
            return Ok(());
        }

        let number = self.active().number + 1;
        let header = SegmentHeader { base_index: index + 1, prev_term: term };
        let fresh = Segment::create(&self.dir, number, header, self.config.fsync)?;
        for stale in std::mem::replace(&mut self.segments, vec![fresh]) {
            stale.remove()?;
        }

        let commit_index = self.commit_index.max(index);
        self.write_commit_state(commit_index)?;
        self.commit_index = commit_index;
        info!(index, term, "raft log skipped ahead");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for segment in &mut self.segments {
            if let Some(file) = segment.file.take() {
                if self.config.fsync {
                    file.sync_all()?;
                }
            }
        }
        self.closed = true;
        self.lock = None;
        info!(dir = %self.dir.display(), "closed raft log");
        Ok(())
    }
}
