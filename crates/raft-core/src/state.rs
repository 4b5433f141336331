//! # state
//!
//! why: hold the per-member consensus bookkeeping that outlives a single message
//! relations: read by the role handlers, overwritten from an Outcome by node.rs
//! what: RaftState, FollowerState, quorum arithmetic

use std::collections::{BTreeMap, BTreeSet};

use crate::log::{LogIndex, Term, NO_INDEX};
use crate::message::MemberId;
use crate::node::NodeState;
use crate::outcome::Outcome;

/// What a leader knows about one follower's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerState {
    /// Highest index known to match the leader's log
    pub match_index: LogIndex,
    /// Next index the leader will ship (everything below was already sent)
    pub next_index: LogIndex,
}

impl FollowerState {
    pub fn new(next_index: LogIndex) -> Self {
        Self { match_index: NO_INDEX, next_index }
    }
}

pub type FollowerStates = BTreeMap<MemberId, FollowerState>;

/// Role, term, vote and replication bookkeeping of one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftState {
    pub myself: MemberId,
    pub voting_members: BTreeSet<MemberId>,
    pub term: Term,
    pub voted_for: Option<MemberId>,
    pub role: NodeState,
    pub leader: Option<MemberId>,
    pub votes_for_me: BTreeSet<MemberId>,
    pub pre_votes_for_me: BTreeSet<MemberId>,
    pub is_pre_election: bool,
    /// Leader's commit index as last seen by this member
    pub leader_commit: LogIndex,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub follower_states: FollowerStates,
    pub heartbeat_responses: BTreeSet<MemberId>,
}

impl RaftState {
    /// A fresh follower at term 0; `members` is the voting set (`myself` is always included).
    pub fn new(myself: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        let mut voting_members: BTreeSet<MemberId> = members.into_iter().collect();
        voting_members.insert(myself);
        Self {
            myself,
            voting_members,
            term: 0,
            voted_for: None,
            role: NodeState::Follower,
            leader: None,
            votes_for_me: BTreeSet::new(),
            pre_votes_for_me: BTreeSet::new(),
            is_pre_election: false,
            leader_commit: NO_INDEX,
            last_log_index_before_we_became_leader: NO_INDEX,
            follower_states: FollowerStates::new(),
            heartbeat_responses: BTreeSet::new(),
        }
    }

    /// Voting members other than this one.
    pub fn other_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        let myself = self.myself;
        self.voting_members.iter().copied().filter(move |m| *m != myself)
    }

    /// Number of members that make a majority.
    pub fn quorum_size(&self) -> usize {
        self.voting_members.len() / 2 + 1
    }

    pub fn is_quorum(&self, count: usize) -> bool {
        count >= self.quorum_size()
    }

    /// Take over every state delta an outcome decided on.
    pub fn update(&mut self, outcome: &Outcome) {
        self.term = outcome.term;
        self.voted_for = outcome.voted_for;
        self.role = outcome.role;
        self.leader = outcome.leader;
        self.votes_for_me = outcome.votes_for_me.clone();
        self.pre_votes_for_me = outcome.pre_votes_for_me.clone();
        self.is_pre_election = outcome.is_pre_election;
        self.leader_commit = outcome.leader_commit;
        self.last_log_index_before_we_became_leader = outcome.last_log_index_before_we_became_leader;
        self.follower_states = outcome.follower_states.clone();
        self.heartbeat_responses = outcome.heartbeat_responses.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_for_3_member_cluster() {
        assert_eq!(RaftState::new(1, [1, 2, 3]).quorum_size(), 2);
    }

    #[test]
    fn quorum_for_5_member_cluster() {
        assert_eq!(RaftState::new(1, [1, 2, 3, 4, 5]).quorum_size(), 3);
    }

    #[test]
    fn single_member_is_its_own_quorum() {
        let state = RaftState::new(1, []);
        assert_eq!(state.quorum_size(), 1);
        assert!(state.is_quorum(1));
    }

    #[test]
    fn other_members_excludes_myself() {
        let state = RaftState::new(2, [1, 2, 3]);
        assert_eq!(state.other_members().collect::<Vec<_>>(), vec![1, 3]);
    }
}
