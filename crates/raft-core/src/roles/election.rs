//! # election
//!
//! why: share vote bookkeeping between followers, candidates and leaders
//! relations: called from follower.rs, candidate.rs and leader.rs
//! what: vote decisions, (pre-)election start, the transition to leader

use tracing::{debug, info};

use crate::command::RaftLogCommand;
use crate::error::Result;
use crate::log::{LogIndex, RaftLogEntry, ReadableRaftLog, Term};
use crate::message::{MemberId, RaftMessage};
use crate::node::NodeState;
use crate::outcome::Outcome;
use crate::state::{FollowerState, RaftState};

/// A candidate's log is at least as up to date as ours if its last term is
/// newer, or the terms are equal and it is at least as long.
pub fn log_is_up_to_date(
    log: &dyn ReadableRaftLog,
    last_log_index: LogIndex,
    last_log_term: Term,
) -> Result<bool> {
    let my_last_term = log.last_entry_term()?;
    Ok(last_log_term > my_last_term
        || (last_log_term == my_last_term && last_log_index >= log.append_index()))
}

/// Answer a VoteRequest in any role. A newer term makes us follower first.
pub fn respond_to_vote_request(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    term: Term,
    candidate: MemberId,
    last_log_index: LogIndex,
    last_log_term: Term,
) -> Result<()> {
    if term > outcome.term {
        info!(member = state.myself, term, candidate, "newer term in vote request, stepping down");
        outcome.step_down(term, None);
    }

    let granted = term == outcome.term
        && outcome.voted_for.map_or(true, |voted| voted == candidate)
        && log_is_up_to_date(log, last_log_index, last_log_term)?;

    if granted {
        outcome.voted_for = Some(candidate);
        outcome.renew_election_timeout = true;
    }
    debug!(member = state.myself, candidate, term, granted, "vote decided");

    outcome.send(
        candidate,
        RaftMessage::VoteResponse {
            from: state.myself,
            term: outcome.term,
            vote_granted: granted,
        },
    );
    Ok(())
}

/// Answer a PreVoteRequest. Never changes term or vote.
///
/// `term` is the term the candidate would campaign in. A member that still
/// follows a live leader refuses.
pub fn respond_to_pre_vote_request(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    term: Term,
    candidate: MemberId,
    last_log_index: LogIndex,
    last_log_term: Term,
) -> Result<()> {
    let granted = term > outcome.term
        && outcome.leader.is_none()
        && log_is_up_to_date(log, last_log_index, last_log_term)?;

    debug!(member = state.myself, candidate, term, granted, "pre-vote decided");
    outcome.send(
        candidate,
        RaftMessage::PreVoteResponse {
            from: state.myself,
            term: outcome.term,
            vote_granted: granted,
        },
    );
    Ok(())
}

/// Ask the cluster whether an election at `term + 1` could win.
pub fn start_pre_election(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
) -> Result<()> {
    outcome.is_pre_election = true;
    outcome.leader = None;
    outcome.pre_votes_for_me.clear();
    outcome.pre_votes_for_me.insert(state.myself);
    outcome.renew_election_timeout = true;

    if state.is_quorum(outcome.pre_votes_for_me.len()) {
        return start_election(state, outcome, log);
    }

    let proposed = outcome.term + 1;
    let last_log_index = log.append_index();
    let last_log_term = log.last_entry_term()?;
    for member in state.other_members() {
        outcome.send(
            member,
            RaftMessage::PreVoteRequest {
                from: state.myself,
                term: proposed,
                candidate: state.myself,
                last_log_index,
                last_log_term,
            },
        );
    }
    info!(member = state.myself, term = proposed, "pre-election started");
    Ok(())
}

/// Bump the term, vote for ourselves and ask everyone else.
pub fn start_election(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
) -> Result<()> {
    outcome.term += 1;
    outcome.voted_for = Some(state.myself);
    outcome.role = NodeState::Candidate;
    outcome.leader = None;
    outcome.is_pre_election = false;
    outcome.pre_votes_for_me.clear();
    outcome.votes_for_me.clear();
    outcome.votes_for_me.insert(state.myself);
    outcome.renew_election_timeout = true;
    info!(member = state.myself, term = outcome.term, "election started");

    if state.is_quorum(outcome.votes_for_me.len()) {
        return become_leader(state, outcome, log);
    }

    let last_log_index = log.append_index();
    let last_log_term = log.last_entry_term()?;
    for member in state.other_members() {
        outcome.send(
            member,
            RaftMessage::VoteRequest {
                from: state.myself,
                term: outcome.term,
                candidate: state.myself,
                last_log_index,
                last_log_term,
            },
        );
    }
    Ok(())
}

/// Take leadership: append a barrier for the new term and ship it.
///
/// Entries from earlier terms only become committable once the barrier,
/// an entry of the leader's own term, reaches a majority.
pub fn become_leader(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
) -> Result<()> {
    let prev_index = log.append_index();
    let prev_term = log.last_entry_term()?;
    let barrier_index = prev_index + 1;
    let barrier = RaftLogEntry::barrier(outcome.term);

    outcome.role = NodeState::Leader;
    outcome.leader = Some(state.myself);
    outcome.votes_for_me.clear();
    outcome.pre_votes_for_me.clear();
    outcome.is_pre_election = false;
    outcome.heartbeat_responses.clear();
    outcome.last_log_index_before_we_became_leader = prev_index;
    outcome.leader_commit = log.commit_index();
    outcome.follower_states.clear();
    outcome.add_log_command(RaftLogCommand::Append {
        index: barrier_index,
        entry: barrier.clone(),
    });
    info!(member = state.myself, term = outcome.term, barrier_index, "became leader");

    for member in state.other_members() {
        outcome
            .follower_states
            .insert(member, FollowerState::new(barrier_index + 1));
        outcome.send(
            member,
            RaftMessage::AppendEntriesRequest {
                from: state.myself,
                leader_term: outcome.term,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries: vec![barrier.clone()],
                leader_commit: outcome.leader_commit,
            },
        );
    }

    if state.is_quorum(1) {
        outcome.add_log_command(RaftLogCommand::CommitIndexUpdate { new_index: barrier_index });
        outcome.leader_commit = barrier_index;
    }
    Ok(())
}
