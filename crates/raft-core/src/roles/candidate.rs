//! # candidate
//!
//! why: collect votes for our own term and yield to any legitimate leader
//! relations: uses election.rs; hands leader traffic to follower.rs after stepping down
//! what: message dispatch for the candidate role

use tracing::{debug, info};

use crate::command::RaftLogCommand;
use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::ReadableRaftLog;
use crate::message::RaftMessage;
use crate::outcome::Outcome;
use crate::state::RaftState;

use super::{appending, election, follower};

pub fn handle(
    state: &RaftState,
    outcome: &mut Outcome,
    message: &RaftMessage,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
) -> Result<()> {
    match message {
        RaftMessage::VoteResponse { from, term, vote_granted } => {
            if *term > outcome.term {
                info!(member = state.myself, term, "newer term in vote response, stepping down");
                outcome.step_down(*term, None);
                return Ok(());
            }
            if *term < outcome.term || !vote_granted {
                debug!(member = state.myself, voter = from, term, vote_granted, "vote not counted");
                return Ok(());
            }
            outcome.votes_for_me.insert(*from);
            if state.is_quorum(outcome.votes_for_me.len()) {
                election::become_leader(state, outcome, log)?;
            }
            Ok(())
        }
        RaftMessage::AppendEntriesRequest { from, leader_term, .. } => {
            if *leader_term < outcome.term {
                appending::reject_stale_append(state, outcome, log, *from);
                return Ok(());
            }
            info!(member = state.myself, leader = from, leader_term, "leader found, abandoning election");
            outcome.step_down(*leader_term, Some(*from));
            follower::handle(state, outcome, message, log, config)
        }
        RaftMessage::Heartbeat { from, leader_term, .. }
        | RaftMessage::LogCompactionInfo { from, leader_term, .. } => {
            if *leader_term < outcome.term {
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            follower::handle(state, outcome, message, log, config)
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
        RaftMessage::PreVoteResponse { term, .. } | RaftMessage::AppendEntriesResponse { term, .. } => {
            if *term > outcome.term {
                outcome.step_down(*term, None);
            }
            Ok(())
        }
        RaftMessage::ElectionTimeout { .. } => {
            debug!(member = state.myself, term = outcome.term, "election timed out, retrying");
            election::start_election(state, outcome, log)
        }
        RaftMessage::PruneRequest { prune_index, .. } => {
            outcome.add_log_command(RaftLogCommand::Prune { prune_index: *prune_index });
            Ok(())
        }
        RaftMessage::NewEntryRequest { .. } | RaftMessage::NewBatchRequest { .. } => {
            debug!(member = state.myself, "election in progress, proposal dropped");
            Ok(())
        }
        RaftMessage::HeartbeatResponse { .. } | RaftMessage::HeartbeatTimeout { .. } => Ok(()),
    }
}
