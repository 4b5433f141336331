//! # follower
//!
//! why: passive role, accepts entries from the leader and votes when asked
//! relations: uses appending.rs for replication and election.rs for votes
//! what: message dispatch for the follower role, including pre-elections

use tracing::{debug, info, warn};

use crate::command::RaftLogCommand;
use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::ReadableRaftLog;
use crate::message::RaftMessage;
use crate::outcome::Outcome;
use crate::state::RaftState;

use super::{appending, election};

pub fn handle(
    state: &RaftState,
    outcome: &mut Outcome,
    message: &RaftMessage,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
) -> Result<()> {
    match message {
        RaftMessage::AppendEntriesRequest {
            from,
            leader_term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } => {
            if *leader_term < outcome.term {
                debug!(member = state.myself, leader = from, leader_term, "stale append request");
                appending::reject_stale_append(state, outcome, log, *from);
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            appending::handle_append_entries(
                state,
                outcome,
                log,
                *from,
                *prev_log_index,
                *prev_log_term,
                entries,
                *leader_commit,
            )
        }
        RaftMessage::Heartbeat { from, leader_term, commit_index, commit_index_term } => {
            if *leader_term < outcome.term {
                debug!(member = state.myself, leader = from, leader_term, "stale heartbeat ignored");
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            appending::handle_heartbeat(state, outcome, log, *from, *commit_index, *commit_index_term)
        }
        RaftMessage::LogCompactionInfo { from, leader_term, prev_index } => {
            if *leader_term < outcome.term {
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            outcome.renew_election_timeout = true;
            if *prev_index > log.append_index() {
                warn!(
                    member = state.myself,
                    leader_prev_index = prev_index,
                    append_index = log.append_index(),
                    "leader pruned entries we still need, snapshot required"
                );
                outcome.snapshot_required = true;
            }
            Ok(())
        }
        RaftMessage::VoteRequest { term, candidate, last_log_index, last_log_term, .. } => {
            election::respond_to_vote_request(
                state,
                outcome,
                log,
                *term,
                *candidate,
                *last_log_index,
                *last_log_term,
            )
        }
        RaftMessage::PreVoteRequest { term, candidate, last_log_index, last_log_term, .. } => {
            election::respond_to_pre_vote_request(
                state,
                outcome,
                log,
                *term,
                *candidate,
                *last_log_index,
                *last_log_term,
            )
        }
        RaftMessage::PreVoteResponse { from, term, vote_granted } => {
            if *term > outcome.term {
                outcome.step_down(*term, None);
                return Ok(());
            }
            if !outcome.is_pre_election || !vote_granted {
                return Ok(());
            }
            outcome.pre_votes_for_me.insert(*from);
            if state.is_quorum(outcome.pre_votes_for_me.len()) {
                info!(member = state.myself, pre_votes = outcome.pre_votes_for_me.len(), "pre-election won");
                election::start_election(state, outcome, log)?;
            }
            Ok(())
        }
        RaftMessage::VoteResponse { term, .. } | RaftMessage::AppendEntriesResponse { term, .. } => {
            if *term > outcome.term {
                outcome.step_down(*term, None);
            }
            Ok(())
        }
        RaftMessage::ElectionTimeout { .. } => {
            if config.refuse_to_be_leader {
                debug!(member = state.myself, "election timeout, refusing to be leader");
                return Ok(());
            }
            if config.pre_vote {
                election::start_pre_election(state, outcome, log)
            } else {
                election::start_election(state, outcome, log)
            }
        }
        RaftMessage::PruneRequest { prune_index, .. } => {
            outcome.add_log_command(RaftLogCommand::Prune { prune_index: *prune_index });
            Ok(())
        }
        RaftMessage::NewEntryRequest { .. } | RaftMessage::NewBatchRequest { .. } => {
            debug!(member = state.myself, leader = ?outcome.leader, "not leader, proposal dropped");
            Ok(())
        }
        RaftMessage::HeartbeatResponse { .. } | RaftMessage::HeartbeatTimeout { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryRaftLog, RaftLog, RaftLogEntry, NO_INDEX};
    use crate::node::NodeState;

    fn run(state: &RaftState, message: RaftMessage, log: &InMemoryRaftLog, config: &RaftConfig) -> Outcome {
        let mut outcome = Outcome::new(state);
        handle(state, &mut outcome, &message, log, config).unwrap();
        outcome
    }

    #[test]
    fn newer_leader_term_is_adopted() {
        let state = RaftState::new(2, [1, 2, 3]);
        let log = InMemoryRaftLog::new();
        let outcome = run(
            &state,
            RaftMessage::Heartbeat { from: 1, leader_term: 4, commit_index: NO_INDEX, commit_index_term: 0 },
            &log,
            &RaftConfig::default(),
        );

        assert_eq!(outcome.term, 4);
        assert_eq!(outcome.leader, Some(1));
        assert!(outcome.renew_election_timeout);
    }

    #[test]
    fn election_timeout_starts_election() {
        let state = RaftState::new(2, [1, 2, 3]);
        let log = InMemoryRaftLog::new();
        let outcome = run(&state, RaftMessage::ElectionTimeout { from: 2 }, &log, &RaftConfig::default());

        assert_eq!(outcome.role, NodeState::Candidate);
        assert_eq!(outcome.term, 1);
        assert_eq!(outcome.voted_for, Some(2));
        assert_eq!(outcome.outgoing.len(), 2);
    }

    #[test]
    fn pre_vote_keeps_term_until_quorum() {
        let state = RaftState::new(2, [1, 2, 3]);
        let log = InMemoryRaftLog::new();
        let config = RaftConfig { pre_vote: true, ..RaftConfig::default() };

        let outcome = run(&state, RaftMessage::ElectionTimeout { from: 2 }, &log, &config);
        assert_eq!(outcome.term, 0);
        assert!(outcome.is_pre_election);
        assert!(matches!(outcome.outgoing[0].message, RaftMessage::PreVoteRequest { term: 1, .. }));

        let mut state = state;
        state.update(&outcome);
        let outcome = run(
            &state,
            RaftMessage::PreVoteResponse { from: 1, term: 0, vote_granted: true },
            &log,
            &config,
        );
        assert_eq!(outcome.role, NodeState::Candidate);
        assert_eq!(outcome.term, 1);
    }

    #[test]
    fn refusing_member_never_campaigns() {
        let state = RaftState::new(2, [1, 2, 3]);
        let log = InMemoryRaftLog::new();
        let config = RaftConfig { refuse_to_be_leader: true, ..RaftConfig::default() };

        let outcome = run(&state, RaftMessage::ElectionTimeout { from: 2 }, &log, &config);

        assert_eq!(outcome.role, NodeState::Follower);
        assert!(outcome.outgoing.is_empty());
    }

    #[test]
    fn compaction_info_beyond_our_log_requires_snapshot() {
        let state = RaftState::new(2, [1, 2, 3]);
        let mut log = InMemoryRaftLog::new();
        log.append(&[RaftLogEntry::new(1, vec![1])], NO_INDEX).unwrap();

        let outcome = run(
            &state,
            RaftMessage::LogCompactionInfo { from: 1, leader_term: 1, prev_index: 10 },
            &log,
            &RaftConfig::default(),
        );

        assert!(outcome.snapshot_required);
    }

    #[test]
    fn proposals_are_dropped() {
        let state = RaftState::new(2, [1, 2, 3]);
        let log = InMemoryRaftLog::new();
        let outcome = run(
            &state,
            RaftMessage::NewEntryRequest { from: 9, content: vec![1] },
            &log,
            &RaftConfig::default(),
        );

        assert!(outcome.log_commands.is_empty());
        assert!(outcome.outgoing.is_empty());
    }
}
