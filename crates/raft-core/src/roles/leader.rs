//! # leader
//!
//! why: drive replication, track follower progress and decide commitment
//! relations: uses election.rs for vote requests; steps down into follower.rs
//! what: message dispatch for the leader role, shipping and commit rules

use tracing::{debug, info, warn};

use crate::command::RaftLogCommand;
use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::{LogIndex, RaftLogEntry, ReadableRaftLog, NO_INDEX};
use crate::message::{MemberId, RaftMessage};
use crate::outcome::Outcome;
use crate::state::{FollowerState, RaftState};

use super::{appending, election, follower};

pub fn handle(
    state: &RaftState,
    outcome: &mut Outcome,
    message: &RaftMessage,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
) -> Result<()> {
    match message {
        RaftMessage::AppendEntriesResponse { from, term, success, match_index, append_index } => {
            if *term > outcome.term {
                info!(member = state.myself, follower = from, term, "newer term from follower, stepping down");
                outcome.step_down(*term, None);
                return Ok(());
            }
            if *term < outcome.term || !state.voting_members.contains(from) {
                debug!(member = state.myself, follower = from, term, "ignoring response");
                return Ok(());
            }
            if *success {
                handle_success(state, outcome, log, config, *from, *match_index)
            } else {
                handle_failure(state, outcome, log, config, *from, *append_index)
            }
        }
        RaftMessage::HeartbeatResponse { from } => {
            if *from == state.myself || !state.voting_members.contains(from) {
                debug!(member = state.myself, from, "heartbeat response from a non-voter ignored");
                return Ok(());
            }
            outcome.heartbeat_responses.insert(*from);
            Ok(())
        }
        RaftMessage::ElectionTimeout { .. } => {
            if !state.is_quorum(outcome.heartbeat_responses.len() + 1) {
                warn!(
                    member = state.myself,
                    term = outcome.term,
                    responses = outcome.heartbeat_responses.len(),
                    "lost contact with a majority, stepping down"
                );
                outcome.step_down(outcome.term, None);
                return Ok(());
            }
            outcome.heartbeat_responses.clear();
            Ok(())
        }
        RaftMessage::HeartbeatTimeout { .. } => send_heartbeats(state, outcome, log, config),
        RaftMessage::NewEntryRequest { content, .. } => {
            append_proposals(state, outcome, log, std::slice::from_ref(content))
        }
        RaftMessage::NewBatchRequest { contents, .. } => append_proposals(state, outcome, log, contents),
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
        RaftMessage::AppendEntriesRequest { from, leader_term, .. } => {
            if *leader_term <= outcome.term {
                // two leaders can't share a term; the sender is stale
                appending::reject_stale_append(state, outcome, log, *from);
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            follower::handle(state, outcome, message, log, config)
        }
        RaftMessage::Heartbeat { from, leader_term, .. }
        | RaftMessage::LogCompactionInfo { from, leader_term, .. } => {
            if *leader_term <= outcome.term {
                return Ok(());
            }
            outcome.step_down(*leader_term, Some(*from));
            follower::handle(state, outcome, message, log, config)
        }
        RaftMessage::VoteResponse { term, .. } | RaftMessage::PreVoteResponse { term, .. } => {
            if *term > outcome.term {
                outcome.step_down(*term, None);
            }
            Ok(())
        }
        RaftMessage::PruneRequest { prune_index, .. } => {
            outcome.add_log_command(RaftLogCommand::Prune { prune_index: *prune_index });
            Ok(())
        }
    }
}

fn follower_state<'a>(outcome: &'a mut Outcome, log: &dyn ReadableRaftLog, member: MemberId) -> &'a mut FollowerState {
    outcome
        .follower_states
        .entry(member)
        .or_insert_with(|| FollowerState::new(log.append_index() + 1))
}

fn handle_success(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
    from: MemberId,
    match_index: LogIndex,
) -> Result<()> {
    let progress = follower_state(outcome, log, from);
    if match_index <= progress.match_index {
        debug!(member = state.myself, follower = from, match_index, "stale success response");
        return Ok(());
    }
    progress.match_index = match_index;
    if progress.next_index <= match_index {
        progress.next_index = match_index + 1;
    }
    let caught_up_to_shipped = progress.next_index == match_index + 1;

    advance_commit(state, outcome, log)?;

    if caught_up_to_shipped && match_index < log.append_index() {
        ship(state, outcome, log, config, from, match_index + 1)?;
    }
    Ok(())
}

fn handle_failure(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
    from: MemberId,
    follower_append_index: LogIndex,
) -> Result<()> {
    if follower_append_index < log.prev_index() {
        info!(
            member = state.myself,
            follower = from,
            follower_append_index,
            prev_index = log.prev_index(),
            "follower needs pruned entries"
        );
        send_compaction_info(state, outcome, log, from);
        return Ok(());
    }

    let progress = follower_state(outcome, log, from);
    let next_index = (progress.next_index - 1)
        .min(follower_append_index.saturating_add(1))
        .max(log.prev_index() + 1)
        .max(0);
    progress.next_index = next_index;
    debug!(member = state.myself, follower = from, next_index, "log mismatch, resending");
    ship(state, outcome, log, config, from, next_index)
}

fn send_compaction_info(state: &RaftState, outcome: &mut Outcome, log: &dyn ReadableRaftLog, to: MemberId) {
    let term = outcome.term;
    outcome.send(
        to,
        RaftMessage::LogCompactionInfo {
            from: state.myself,
            leader_term: term,
            prev_index: log.prev_index(),
        },
    );
}

/// Send up to `catchup_batch_size` entries starting at `from_index`.
fn ship(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
    to: MemberId,
    from_index: LogIndex,
) -> Result<()> {
    let prev_log_index = from_index - 1;
    let Some(prev_log_term) = log.read_entry_term(prev_log_index)? else {
        send_compaction_info(state, outcome, log, to);
        return Ok(());
    };
    let entries = log.read_entries(from_index, config.catchup_batch_size)?;
    follower_state(outcome, log, to).next_index = from_index + entries.len() as LogIndex;

    let (leader_term, leader_commit) = (outcome.term, outcome.leader_commit);
    outcome.send(
        to,
        RaftMessage::AppendEntriesRequest {
            from: state.myself,
            leader_term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        },
    );
    Ok(())
}

/// Commit the highest index held by a majority, if it belongs to our term.
fn advance_commit(state: &RaftState, outcome: &mut Outcome, log: &dyn ReadableRaftLog) -> Result<()> {
    let mut matched: Vec<LogIndex> = state
        .other_members()
        .map(|m| outcome.follower_states.get(&m).map_or(NO_INDEX, |f| f.match_index))
        .collect();
    matched.push(log.append_index());
    matched.sort_unstable_by(|a, b| b.cmp(a));

    let quorum_index = matched[state.quorum_size() - 1];
    if quorum_index <= outcome.leader_commit.max(log.commit_index()) {
        return Ok(());
    }
    if log.read_entry_term(quorum_index)? != Some(outcome.term) {
        debug!(member = state.myself, quorum_index, "majority index is from an older term, not committing");
        return Ok(());
    }
    debug!(member = state.myself, commit_index = quorum_index, "commit advanced");
    outcome.add_log_command(RaftLogCommand::CommitIndexUpdate { new_index: quorum_index });
    outcome.leader_commit = quorum_index;
    Ok(())
}

fn send_heartbeats(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
) -> Result<()> {
    let commit_index = outcome.leader_commit;
    let commit_index_term = log.read_entry_term(commit_index)?.unwrap_or(0);
    for member in state.other_members() {
        outcome.send(
            member,
            RaftMessage::Heartbeat {
                from: state.myself,
                leader_term: outcome.term,
                commit_index,
                commit_index_term,
            },
        );
        // resend whatever the follower has not acknowledged, lost requests included
        let progress = *follower_state(outcome, log, member);
        if progress.match_index < log.append_index() {
            ship(state, outcome, log, config, member, progress.match_index + 1)?;
        }
    }
    Ok(())
}

/// Append client proposals in the current term and ship them to followers
/// that are caught up. Lagging followers receive them on catch-up.
fn append_proposals(
    state: &RaftState,
    outcome: &mut Outcome,
    log: &dyn ReadableRaftLog,
    contents: &[Vec<u8>],
) -> Result<()> {
    let entries: Vec<RaftLogEntry> = contents
        .iter()
        .filter(|content| !content.is_empty())
        .map(|content| RaftLogEntry::new(outcome.term, content.clone()))
        .collect();
    if entries.len() < contents.len() {
        debug!(member = state.myself, "empty proposals are reserved for barriers, dropped");
    }
    if entries.is_empty() {
        return Ok(());
    }

    let prev_log_index = log.append_index();
    let prev_log_term = log.last_entry_term()?;
    let first_index = prev_log_index + 1;
    let last_index = prev_log_index + entries.len() as LogIndex;

    if let [entry] = entries.as_slice() {
        outcome.add_log_command(RaftLogCommand::Append { index: first_index, entry: entry.clone() });
    } else {
        outcome.add_log_command(RaftLogCommand::BatchAppend {
            base_index: first_index,
            offset: 0,
            entries: entries.clone(),
        });
    }

    let (leader_term, leader_commit) = (outcome.term, outcome.leader_commit);
    for member in state.other_members() {
        let progress = follower_state(outcome, log, member);
        if progress.next_index != first_index {
            continue;
        }
        progress.next_index = last_index + 1;
        outcome.send(
            member,
            RaftMessage::AppendEntriesRequest {
                from: state.myself,
                leader_term,
                prev_log_index,
                prev_log_term,
                entries: entries.clone(),
                leader_commit,
            },
        );
    }

    if state.is_quorum(1) {
        outcome.add_log_command(RaftLogCommand::CommitIndexUpdate { new_index: last_index });
        outcome.leader_commit = last_index;
    }
    Ok(())
}
