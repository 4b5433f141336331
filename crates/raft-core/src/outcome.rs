//! # outcome
//!
//! why: make every state transition an explicit value instead of in-place mutation
//! relations: built by the role handlers from a RaftState, consumed once by node.rs
//! what: Outcome with its state deltas, log commands and outbound messages

use std::collections::BTreeSet;

use crate::command::RaftLogCommand;
use crate::log::{LogIndex, Term};
use crate::message::{Directed, MemberId, RaftMessage};
use crate::node::NodeState;
use crate::state::{FollowerStates, RaftState};

/// Result of processing one message.
///
/// Starts as a copy of the current state; handlers overwrite the fields they
/// decide on and queue log commands and messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub role: NodeState,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub voted_for: Option<MemberId>,
    pub votes_for_me: BTreeSet<MemberId>,
    pub pre_votes_for_me: BTreeSet<MemberId>,
    pub is_pre_election: bool,
    pub leader_commit: LogIndex,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub follower_states: FollowerStates,
    pub heartbeat_responses: BTreeSet<MemberId>,
    /// Restart the election timer (valid leader contact or vote granted)
    pub renew_election_timeout: bool,
    /// The leader has pruned entries this member still needs
    pub snapshot_required: bool,
    pub log_commands: Vec<RaftLogCommand>,
    pub outgoing: Vec<Directed>,
}

impl Outcome {
    pub fn new(state: &RaftState) -> Self {
        Self {
            role: state.role,
            term: state.term,
            leader: state.leader,
            voted_for: state.voted_for,
            votes_for_me: state.votes_for_me.clone(),
            pre_votes_for_me: state.pre_votes_for_me.clone(),
            is_pre_election: state.is_pre_election,
            leader_commit: state.leader_commit,
            last_log_index_before_we_became_leader: state.last_log_index_before_we_became_leader,
            follower_states: state.follower_states.clone(),
            heartbeat_responses: state.heartbeat_responses.clone(),
            renew_election_timeout: false,
            snapshot_required: false,
            log_commands: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Adopt a newer term; the vote is reset because it belonged to the old term.
    pub fn observe_term(&mut self, term: Term) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
    }

    /// Fall back to follower, dropping all candidate and leader bookkeeping.
    pub fn step_down(&mut self, term: Term, leader: Option<MemberId>) {
        self.observe_term(term);
        self.role = NodeState::Follower;
        self.leader = leader;
        self.votes_for_me.clear();
        self.pre_votes_for_me.clear();
        self.is_pre_election = false;
        self.follower_states.clear();
        self.heartbeat_responses.clear();
    }

    pub fn send(&mut self, to: MemberId, message: RaftMessage) {
        self.outgoing.push(Directed::new(to, message));
    }

    pub fn add_log_command(&mut self, command: RaftLogCommand) {
        self.log_commands.push(command);
    }

    /// Whether term or vote differ from `state`, i.e. must be persisted before acting.
    pub fn changes_term_or_vote(&self, state: &RaftState) -> bool {
        self.term != state.term || self.voted_for != state.voted_for
    }
}
