//! # appending
//!
//! why: the follower side of log replication, shared by every role that steps down to it
//! relations: called from follower.rs; candidate.rs and leader.rs delegate after stepping down
//! what: log matching, conflict detection, AppendEntries and Heartbeat handling

use tracing::{debug, error};

use crate::command::RaftLogCommand;
use crate::error::Result;
use crate::log::{LogIndex, RaftLogEntry, ReadableRaftLog, Term, NO_INDEX};
use crate::message::{MemberId, RaftMessage};
use crate::outcome::Outcome;
use crate::state::RaftState;

/// Whether our log holds `term` at `index`. Pruned indices are committed and
/// therefore match by definition.
pub fn log_history_matches(log: &dyn ReadableRaftLog, index: LogIndex, term: Term) -> Result<bool> {
    if index < log.prev_index() {
        return Ok(true);
    }
    Ok(log.read_entry_term(index)? == Some(term))
}

fn respond(state: &RaftState, outcome: &mut Outcome, to: MemberId, success: bool, match_index: LogIndex, append_index: LogIndex) {
    outcome.send(
        to,
        RaftMessage::AppendEntriesResponse {
            from: state.myself,
            term: outcome.term,
            success,
            match_index,
            append_index,
        },
    );
}

/// Reply to a request from a leader whose term is older than ours.
pub fn reject_stale_append(state: &RaftState, outcome: &mut Outcome, log: &dyn ReadableRaftLog, leader: MemberId) {
    respond(state, outcome, leader, false, NO_INDEX, log.append_index());
}

/// Handle an AppendEntriesRequest from a leader whose term is at least ours.
/// The caller has already stepped down to follower of `leader`.
#[allow(clippy::too_many_arguments)]
pub fn handle_append_entries(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    leader: MemberId,
    prev_log_index: LogIndex,
    prev_log_term: Term,
    entries: &[RaftLogEntry],
    leader_commit: LogIndex,
) -> Result<()> {
    outcome.renew_election_timeout = true;
    outcome.leader_commit = leader_commit;

    if !log_history_matches(log, prev_log_index, prev_log_term)? {
        debug!(
            member = state.myself,
            prev_log_index,
            prev_log_term,
            append_index = log.append_index(),
            "log mismatch at previous index"
        );
        respond(state, outcome, leader, false, NO_INDEX, log.append_index());
        return Ok(());
    }

    let base_index = prev_log_index + 1;
    let mut append_index = log.append_index();
    let mut offset = entries.len();

    for (i, entry) in entries.iter().enumerate() {
        let index = base_index + i as LogIndex;
        if index <= log.prev_index() {
            continue;
        }
        if index > append_index {
            offset = i;
            break;
        }
        if log.read_entry_term(index)? != Some(entry.term) {
            if index <= log.commit_index() {
                error!(
                    member = state.myself,
                    index,
                    commit_index = log.commit_index(),
                    "leader conflicts with a committed entry, refusing to truncate"
                );
                respond(state, outcome, leader, false, NO_INDEX, log.append_index());
                return Ok(());
            }
            outcome.add_log_command(RaftLogCommand::Truncate { from_index: index });
            append_index = index - 1;
            offset = i;
            break;
        }
    }

    if offset < entries.len() {
        outcome.add_log_command(RaftLogCommand::BatchAppend {
            base_index,
            offset,
            entries: entries.to_vec(),
        });
        append_index = prev_log_index + entries.len() as LogIndex;
    }

    let last_new_index = prev_log_index + entries.len() as LogIndex;
    let commit = leader_commit.min(last_new_index);
    if commit > log.commit_index() {
        outcome.add_log_command(RaftLogCommand::CommitIndexUpdate { new_index: commit });
    }

    respond(state, outcome, leader, true, last_new_index, append_index);
    Ok(())
}

/// Handle a Heartbeat from a leader whose term is at least ours.
pub fn handle_heartbeat(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    leader: MemberId,
    commit_index: LogIndex,
    commit_index_term: Term,
) -> Result<()> {
    outcome.renew_election_timeout = true;
    outcome.leader_commit = commit_index;
    outcome.send(leader, RaftMessage::HeartbeatResponse { from: state.myself });

    if commit_index > log.commit_index()
        && commit_index <= log.append_index()
        && log_history_matches(log, commit_index, commit_index_term)?
    {
        outcome.add_log_command(RaftLogCommand::CommitIndexUpdate { new_index: commit_index });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryRaftLog, RaftLog};

    fn entries(terms: &[Term]) -> Vec<RaftLogEntry> {
        terms.iter().map(|t| RaftLogEntry::new(*t, vec![*t as u8])).collect()
    }

    fn setup(terms: &[Term]) -> (RaftState, InMemoryRaftLog) {
        let mut log = InMemoryRaftLog::new();
        if !terms.is_empty() {
            log.append(&entries(terms), NO_INDEX).unwrap();
        }
        (RaftState::new(2, [1, 2, 3]), log)
    }

    fn response(outcome: &Outcome) -> (bool, LogIndex, LogIndex) {
        match outcome.outgoing[0].message {
            RaftMessage::AppendEntriesResponse { success, match_index, append_index, .. } => {
                (success, match_index, append_index)
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn appends_new_entries_after_matching_prefix() {
        let (state, log) = setup(&[1, 1]);
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 1, 1, &entries(&[1, 2]), NO_INDEX).unwrap();

        assert_eq!(
            outcome.log_commands,
            vec![RaftLogCommand::BatchAppend { base_index: 2, offset: 0, entries: entries(&[1, 2]) }]
        );
        assert_eq!(response(&outcome), (true, 3, 3));
    }

    #[test]
    fn rejects_when_previous_entry_missing() {
        let (state, log) = setup(&[1]);
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 4, 1, &entries(&[1]), NO_INDEX).unwrap();

        assert!(outcome.log_commands.is_empty());
        assert_eq!(response(&outcome), (false, NO_INDEX, 0));
    }

    #[test]
    fn truncates_conflicting_suffix_then_appends() {
        let (state, log) = setup(&[1, 1, 1]);
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 0, 1, &entries(&[1, 2]), NO_INDEX).unwrap();

        assert_eq!(
            outcome.log_commands,
            vec![
                RaftLogCommand::Truncate { from_index: 2 },
                RaftLogCommand::BatchAppend { base_index: 1, offset: 1, entries: entries(&[1, 2]) },
            ]
        );
        assert_eq!(response(&outcome), (true, 2, 2));
    }

    #[test]
    fn duplicate_request_changes_nothing() {
        let (state, log) = setup(&[1, 1, 1]);
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 0, 1, &entries(&[1]), NO_INDEX).unwrap();

        assert!(outcome.log_commands.is_empty());
        assert_eq!(response(&outcome), (true, 1, 2));
    }

    #[test]
    fn never_truncates_committed_entries() {
        let (state, mut log) = setup(&[1, 1, 1]);
        log.advance_commit_index(2).unwrap();
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 0, 1, &entries(&[2]), NO_INDEX).unwrap();

        assert!(outcome.log_commands.is_empty());
        assert!(!response(&outcome).0);
    }

    #[test]
    fn commit_is_capped_by_last_new_entry() {
        let (state, log) = setup(&[1, 1, 1]);
        let mut outcome = Outcome::new(&state);

        handle_append_entries(&state, &mut outcome, &log, 1, 0, 1, &entries(&[1]), 2).unwrap();

        assert_eq!(outcome.log_commands, vec![RaftLogCommand::CommitIndexUpdate { new_index: 1 }]);
    }

    #[test]
    fn heartbeat_commits_only_matching_entry() {
        let (state, log) = setup(&[1, 1]);

        let mut matching = Outcome::new(&state);
        handle_heartbeat(&state, &mut matching, &log, 1, 1, 1).unwrap();
        assert_eq!(matching.log_commands, vec![RaftLogCommand::CommitIndexUpdate { new_index: 1 }]);

        let mut diverged = Outcome::new(&state);
        handle_heartbeat(&state, &mut diverged, &log, 1, 1, 2).unwrap();
        assert!(diverged.log_commands.is_empty());
        assert_eq!(diverged.outgoing[0].message, RaftMessage::HeartbeatResponse { from: 2 });
    }
}
