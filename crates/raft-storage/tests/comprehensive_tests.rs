//! # comprehensive storage tests
//!
//! why: prove the on-disk log and term store keep their promises across reopen, crash and corruption
//! relations: tests raft-storage crate, drives raft-core's RaftNode over the durable log
//! what: term persistence, segmented log, crash recovery, atomic writes, store lock, edge cases

use raft_core::{
    LogIndex, NodeState, RaftConfig, RaftError, RaftLog, RaftLogEntry, RaftMessage, RaftNode,
    ReadableRaftLog, Result, Term, TermStore, NO_INDEX,
};
use raft_storage::segment::{SegmentHeader, HEADER_SIZE, RECORD_HEADER_SIZE};
use raft_storage::{ClusterStateDirectory, FileTermStore, SegmentedRaftLog, StorageConfig, StorageError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

/// eight 100-byte entries fit in one segment
fn small_segments() -> StorageConfig {
    StorageConfig { segment_size_bytes: 1024, fsync: false }
}

fn entry(term: Term, fill: u8) -> RaftLogEntry {
    RaftLogEntry::new(term, vec![fill; 100])
}

fn entries(term: Term, count: u8) -> Vec<RaftLogEntry> {
    (0..count).map(|i| entry(term, i)).collect()
}

fn open(dir: &Path) -> SegmentedRaftLog {
    SegmentedRaftLog::open(dir, small_segments()).unwrap()
}

fn segment_path(dir: &Path, number: u64) -> std::path::PathBuf {
    dir.join(format!("segment.{number}"))
}

fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

// =============================================================================
// SECTION 1: TERM STORE TESTS
// =============================================================================

mod term_store {
    use super::*;

    #[test]
    fn save_voted_for_none() {
        let dir = tempdir().unwrap();
        let mut store = FileTermStore::new(dir.path()).unwrap();

        store.save_term_and_vote(10, None).unwrap();
        assert_eq!(store.load_term_and_vote().unwrap(), (10, None));
    }

    #[test]
    fn overwrite_term_and_vote() {
        let dir = tempdir().unwrap();
        let mut store = FileTermStore::new(dir.path()).unwrap();

        store.save_term_and_vote(1, Some(1)).unwrap();
        store.save_term_and_vote(5, Some(3)).unwrap();

        assert_eq!(store.load_term_and_vote().unwrap(), (5, Some(3)));
    }

    #[test]
    fn create_store_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("member");

        let store = FileTermStore::new(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.dir(), path.as_path());
    }

    #[test]
    fn very_high_term_number() {
        let dir = tempdir().unwrap();
        let mut store = FileTermStore::new(dir.path()).unwrap();

        store.save_term_and_vote(u64::MAX, Some(u64::MAX)).unwrap();
        assert_eq!(store.load_term_and_vote().unwrap(), (u64::MAX, Some(u64::MAX)));
    }
}

// =============================================================================
// SECTION 2: SEGMENTED LOG TESTS
// =============================================================================

mod segmented_log_basic {
    use super::*;

    #[test]
    fn open_creates_first_segment() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());

        assert!(segment_path(dir.path(), 0).exists());
        assert_eq!(log.append_index(), NO_INDEX);
        assert_eq!(log.last_entry_term().unwrap(), 0);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());

        assert_eq!(log.append(&entries(1, 3), NO_INDEX).unwrap(), 2);
        assert_eq!(log.append(&[entry(2, 9)], 2).unwrap(), 3);

        assert_eq!(log.read_entry(1).unwrap(), entry(1, 1));
        assert_eq!(log.read_entry(3).unwrap(), entry(2, 9));
        assert_eq!(log.last_entry_term().unwrap(), 2);
    }

    #[test]
    fn append_with_wrong_prior_index_is_a_conflict() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 2), NO_INDEX).unwrap();

        let err = log.append(&[entry(1, 5)], 0).unwrap_err();

        assert!(matches!(err, RaftError::LogConflict { expected: 0, actual: 1 }));
        assert_eq!(log.append_index(), 1);
    }

    #[test]
    fn read_outside_the_log_is_not_found() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 2), NO_INDEX).unwrap();

        assert!(matches!(log.read_entry(2), Err(RaftError::NotFound { index: 2 })));
        assert!(matches!(log.read_entry(-1), Err(RaftError::NotFound { index: -1 })));
        assert_eq!(log.read_entry_term(5).unwrap(), None);
        assert_eq!(log.read_entry_term(NO_INDEX).unwrap(), Some(0));
    }

    #[test]
    fn batch_read_spans_segments() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 20), NO_INDEX).unwrap();

        let read = log.read_entries(6, 5).unwrap();

        assert_eq!(read.len(), 5);
        assert_eq!(read[0], entry(1, 6));
        assert_eq!(read[4], entry(1, 10));
        assert_eq!(log.segment_count(), 3);
    }

    #[test]
    fn oversized_entry_gets_its_own_segment() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&[entry(1, 0)], NO_INDEX).unwrap();

        let big = RaftLogEntry::new(1, vec![7; 4096]);
        log.append(&[big.clone()], 0).unwrap();

        assert_eq!(log.segment_count(), 2);
        assert_eq!(log.read_entry(1).unwrap(), big);
    }
}

mod segmented_log_mutation {
    use super::*;

    #[test]
    fn truncate_within_active_segment() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 5), NO_INDEX).unwrap();

        log.truncate(2).unwrap();

        assert_eq!(log.append_index(), 1);
        assert_eq!(log.append(&[entry(3, 42)], 1).unwrap(), 2);
        assert_eq!(log.read_entry(2).unwrap(), entry(3, 42));
    }

    #[test]
    fn truncate_at_segment_boundary_keeps_earlier_segments() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 20), NO_INDEX).unwrap();

        log.truncate(8).unwrap();

        assert_eq!(log.append_index(), 7);
        assert_eq!(log.read_entry(7).unwrap(), entry(1, 7));
        assert!(!segment_path(dir.path(), 2).exists());
    }

    #[test]
    fn truncate_of_committed_entries_is_refused() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 5), NO_INDEX).unwrap();
        log.advance_commit_index(3).unwrap();

        assert!(matches!(log.truncate(3), Err(RaftError::TruncateCommitted { from: 3, commit_index: 3 })));
        assert!(log.truncate(4).is_ok());
    }

    #[test]
    fn commit_cannot_pass_append_index() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 2), NO_INDEX).unwrap();

        assert!(matches!(
            log.advance_commit_index(2),
            Err(RaftError::CommitBeyondAppend { requested: 2, append_index: 1 })
        ));
    }

    #[test]
    fn prune_never_removes_the_active_segment() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 5), NO_INDEX).unwrap();
        log.advance_commit_index(4).unwrap();

        assert_eq!(log.prune(4).unwrap(), NO_INDEX);
        assert_eq!(log.segment_count(), 1);
    }

    #[test]
    fn prune_is_bounded_by_safe_index() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 20), NO_INDEX).unwrap();
        log.advance_commit_index(19).unwrap();

        // segment 0 holds 0..=7, segment 1 holds 8..=15
        assert_eq!(log.prune(10).unwrap(), 7);
        assert!(!segment_path(dir.path(), 0).exists());
        assert!(segment_path(dir.path(), 1).exists());
        assert!(matches!(log.read_entry(7), Err(RaftError::NotFound { index: 7 })));
        assert_eq!(log.read_entry_term(7).unwrap(), Some(1));
    }

    #[test]
    fn truncate_into_pruned_prefix_is_refused() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 20), NO_INDEX).unwrap();
        log.advance_commit_index(9).unwrap();
        log.prune(9).unwrap();

        assert!(matches!(log.truncate(5), Err(RaftError::TruncateCommitted { .. })));
    }

    #[test]
    fn skip_behind_append_index_is_ignored() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 5), NO_INDEX).unwrap();

        log.skip(3, 1).unwrap();

        assert_eq!(log.prev_index(), NO_INDEX);
        assert_eq!(log.append_index(), 4);
    }
}

// =============================================================================
// SECTION 3: CRASH RECOVERY / PERSISTENCE TESTS
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn log_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(2, 12), NO_INDEX).unwrap();
            log.advance_commit_index(9).unwrap();
            log.close().unwrap();
        }

        let log = open(dir.path());
        assert_eq!(log.append_index(), 11);
        assert_eq!(log.commit_index(), 9);
        assert_eq!(log.read_entry(10).unwrap(), entry(2, 10));
        assert_eq!(log.segment_count(), 2);
    }

    #[test]
    fn pruned_log_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 20), NO_INDEX).unwrap();
            log.advance_commit_index(19).unwrap();
            log.prune(19).unwrap();
        }

        let log = open(dir.path());
        assert_eq!(log.prev_index(), 15);
        assert_eq!(log.read_entry_term(15).unwrap(), Some(1));
        assert_eq!(log.commit_index(), 19);
    }

    #[test]
    fn partial_record_at_tail_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        let path = segment_path(dir.path(), 0);
        let valid_len = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 10]).unwrap();
        drop(file);

        let mut log = open(dir.path());

        assert_eq!(log.append_index(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
        assert_eq!(log.append(&[entry(1, 3)], 2).unwrap(), 3);
    }

    #[test]
    fn bad_checksum_on_last_record_counts_as_torn() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        let path = segment_path(dir.path(), 0);
        let len = fs::metadata(&path).unwrap().len() as usize;
        flip_byte(&path, len - 1);

        let log = open(dir.path());
        assert_eq!(log.append_index(), 1);
    }

    #[test]
    fn bad_checksum_before_the_tail_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        flip_byte(&segment_path(dir.path(), 0), HEADER_SIZE + RECORD_HEADER_SIZE);

        let err = SegmentedRaftLog::open(dir.path(), small_segments()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[test]
    fn cut_sealed_segment_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 20), NO_INDEX).unwrap();
        }
        let path = segment_path(dir.path(), 0);
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 5).unwrap();

        let err = SegmentedRaftLog::open(dir.path(), small_segments()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
        assert!(matches!(RaftError::from(err), RaftError::Corrupted(_)));
    }

    #[test]
    fn overlapping_segments_are_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        let header = SegmentHeader { base_index: 1, prev_term: 1 };
        fs::write(segment_path(dir.path(), 1), header.encode().unwrap()).unwrap();

        let err = SegmentedRaftLog::open(dir.path(), small_segments()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[test]
    fn segment_with_wrong_previous_term_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        let header = SegmentHeader { base_index: 3, prev_term: 9 };
        fs::write(segment_path(dir.path(), 1), header.encode().unwrap()).unwrap();

        let err = SegmentedRaftLog::open(dir.path(), small_segments()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[test]
    fn interrupted_skip_is_completed_on_open() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        // the skip wrote its new segment but crashed before removing the old one
        let header = SegmentHeader { base_index: 40, prev_term: 3 };
        fs::write(segment_path(dir.path(), 7), header.encode().unwrap()).unwrap();

        let log = open(dir.path());

        assert_eq!(log.prev_index(), 39);
        assert_eq!(log.append_index(), 39);
        assert_eq!(log.commit_index(), 39);
        assert_eq!(log.read_entry_term(39).unwrap(), Some(3));
        assert!(!segment_path(dir.path(), 0).exists());
    }

    #[test]
    fn commit_marker_beyond_log_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = open(dir.path());
            log.append(&entries(1, 3), NO_INDEX).unwrap();
        }
        fs::write(dir.path().join("commit.state"), r#"{ "commit_index": 99 }"#).unwrap();

        let err = SegmentedRaftLog::open(dir.path(), small_segments()).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[test]
    fn multiple_restarts_preserve_state() {
        let dir = tempdir().unwrap();
        for round in 0..3u8 {
            let mut log = open(dir.path());
            let prior = log.append_index();
            log.append(&[entry(round as Term + 1, round)], prior).unwrap();
            log.close().unwrap();
        }

        let log = open(dir.path());
        assert_eq!(log.append_index(), 2);
        assert_eq!(log.read_entry_term(2).unwrap(), Some(3));
    }
}

// =============================================================================
// SECTION 4: ATOMIC WRITE TESTS
// =============================================================================

mod atomic_writes {
    use super::*;

    #[test]
    fn commit_marker_is_valid_json() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 2), NO_INDEX).unwrap();
        log.advance_commit_index(1).unwrap();

        let content = fs::read_to_string(dir.path().join("commit.state")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["commit_index"], 1);
    }

    #[test]
    fn no_temp_files_remain() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 20), NO_INDEX).unwrap();
        for index in 0..20 {
            log.advance_commit_index(index).unwrap();
        }
        let mut store = FileTermStore::new(dir.path()).unwrap();
        store.save_term_and_vote(3, Some(1)).unwrap();

        for dir_entry in fs::read_dir(dir.path()).unwrap() {
            let name = dir_entry.unwrap().file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"), "found temp file: {name:?}");
        }
    }

    #[test]
    fn leftover_temp_files_are_cleaned_on_open() {
        let dir = tempdir().unwrap();
        drop(open(dir.path()));
        fs::write(dir.path().join("segment.1.tmp"), b"half written").unwrap();

        let log = open(dir.path());

        assert_eq!(log.segment_count(), 1);
        assert!(!dir.path().join("segment.1.tmp").exists());
    }

    #[test]
    fn failed_rotation_discards_the_whole_batch() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        // a directory where the next segment's temp file goes makes rotation fail
        fs::create_dir(dir.path().join("segment.1.tmp")).unwrap();

        let result = log.append(&entries(1, 20), NO_INDEX);

        assert!(matches!(result, Err(RaftError::Io(_))));
        assert_eq!(log.append_index(), NO_INDEX);
        assert_eq!(log.segment_count(), 1);
        assert!(matches!(log.read_entry(0), Err(RaftError::NotFound { index: 0 })));
        assert!(matches!(log.advance_commit_index(5), Err(RaftError::CommitBeyondAppend { .. })));
        assert_eq!(fs::metadata(segment_path(dir.path(), 0)).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn log_accepts_the_batch_again_after_a_failed_append() {
        let dir = tempdir().unwrap();
        let mut log = open(dir.path());
        log.append(&entries(1, 3), NO_INDEX).unwrap();
        let squatter = dir.path().join("segment.1.tmp");
        fs::create_dir(&squatter).unwrap();

        assert!(log.append(&entries(2, 20), 2).is_err());
        assert_eq!(log.append_index(), 2);
        assert_eq!(
            fs::metadata(segment_path(dir.path(), 0)).unwrap().len(),
            (HEADER_SIZE + 3 * (RECORD_HEADER_SIZE + 100)) as u64
        );

        fs::remove_dir(&squatter).unwrap();
        assert_eq!(log.append(&entries(2, 20), 2).unwrap(), 22);
        drop(log);

        let log = open(dir.path());
        assert_eq!(log.append_index(), 22);
        assert_eq!(log.read_entry(2).unwrap(), entry(1, 2));
        assert_eq!(log.read_entry(3).unwrap(), entry(2, 0));
        assert_eq!(log.read_entry(22).unwrap(), entry(2, 19));
    }
}

// =============================================================================
// SECTION 5: CLUSTER STATE DIRECTORY TESTS
// =============================================================================

mod cluster_state_directory {
    use super::*;

    #[test]
    fn open_lays_out_the_directory() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));

        let (_log, _store) = state.open(&small_segments()).unwrap();

        assert!(state.lock_path().exists());
        assert!(state.log_dir().join("segment.0").exists());
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        let (_log, _store) = state.open(&small_segments()).unwrap();

        assert!(matches!(state.open(&small_segments()), Err(StorageError::Locked(_))));
    }

    #[test]
    fn unbind_while_active_fails() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        let (mut log, _store) = state.open(&small_segments()).unwrap();
        log.append(&entries(1, 2), NO_INDEX).unwrap();

        let err = state.unbind().unwrap_err();

        assert!(matches!(err, StorageError::Locked(_)));
        assert!(matches!(RaftError::from(err), RaftError::StoreLocked(_)));
        assert!(state.log_dir().exists());
    }

    #[test]
    fn unbind_after_close_removes_everything() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        let (mut log, mut store) = state.open(&small_segments()).unwrap();
        log.append(&entries(1, 2), NO_INDEX).unwrap();
        store.save_term_and_vote(1, Some(1)).unwrap();

        log.close().unwrap();
        state.unbind().unwrap();

        assert!(!state.root().exists());
    }

    #[test]
    fn reopen_after_unbind_starts_fresh() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        {
            let (mut log, mut store) = state.open(&small_segments()).unwrap();
            log.append(&entries(4, 2), NO_INDEX).unwrap();
            store.save_term_and_vote(4, None).unwrap();
        }
        state.unbind().unwrap();

        let (log, store) = state.open(&small_segments()).unwrap();
        assert_eq!(log.append_index(), NO_INDEX);
        assert_eq!(store.load_term_and_vote().unwrap(), (0, None));
    }
}

// =============================================================================
// SECTION 6: RAFT NODE OVER DURABLE STATE
// =============================================================================

mod durable_node {
    use super::*;

    fn start(state: &ClusterStateDirectory) -> RaftNode<SegmentedRaftLog, FileTermStore> {
        let (log, store) = state.open(&small_segments()).unwrap();
        RaftNode::new(1, [1], log, store, RaftConfig::default()).unwrap()
    }

    #[test]
    fn single_member_commits_and_restarts() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        {
            let mut node = start(&state);
            node.handle(RaftMessage::ElectionTimeout { from: 1 }).unwrap();
            assert_eq!(node.role(), NodeState::Leader);

            node.handle(RaftMessage::NewEntryRequest { from: 1, content: b"set x 1".to_vec() })
                .unwrap();
            assert_eq!(node.log().commit_index(), 1);
            node.close().unwrap();
        }

        let mut node = start(&state);
        assert_eq!(node.term(), 1);
        assert_eq!(node.role(), NodeState::Follower);
        assert_eq!(node.log().commit_index(), 1);

        let mut delivered = Vec::new();
        let mut listener = |index: LogIndex, content: &[u8]| -> Result<()> {
            delivered.push((index, content.to_vec()));
            Ok(())
        };
        assert_eq!(node.deliver_committed(&mut listener).unwrap(), 1);
        assert_eq!(delivered, vec![(1, b"set x 1".to_vec())]);
    }

    #[test]
    fn closed_node_releases_the_directory() {
        let dir = tempdir().unwrap();
        let state = ClusterStateDirectory::new(dir.path().join("group"));
        let mut node = start(&state);
        node.handle(RaftMessage::ElectionTimeout { from: 1 }).unwrap();

        assert!(state.unbind().is_err());
        node.close().unwrap();
        assert!(state.unbind().is_ok());
    }
}
