//! # message
//!
//! why: define all raft rpc message types for member communication
//! relations: consumed by the role handlers, framed on the wire by raft-transport
//! what: MemberId, ClusterId, MessageType, RaftMessage, Directed, ClusterIdAwareMessage

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::{LogIndex, RaftLogEntry, Term};

/// Identity of a cluster member.
pub type MemberId = u64;

/// Identifies which logical cluster a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(Uuid);

impl ClusterId {
    /// A fresh random cluster id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Wire discriminant of each message kind.
///
/// Position identifies messages on the wire; never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    VoteRequest = 0,
    VoteResponse = 1,
    AppendEntriesRequest = 2,
    AppendEntriesResponse = 3,
    Heartbeat = 4,
    HeartbeatResponse = 5,
    LogCompactionInfo = 6,
    ElectionTimeout = 7,
    HeartbeatTimeout = 8,
    NewEntryRequest = 9,
    NewBatchRequest = 10,
    PruneRequest = 11,
    PreVoteRequest = 12,
    PreVoteResponse = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            0 => VoteRequest,
            1 => VoteResponse,
            2 => AppendEntriesRequest,
            3 => AppendEntriesResponse,
            4 => Heartbeat,
            5 => HeartbeatResponse,
            6 => LogCompactionInfo,
            7 => ElectionTimeout,
            8 => HeartbeatTimeout,
            9 => NewEntryRequest,
            10 => NewBatchRequest,
            11 => PruneRequest,
            12 => PreVoteRequest,
            13 => PreVoteResponse,
            other => return Err(other),
        })
    }
}

/// All possible Raft messages between members, plus the local timer ticks
/// and client proposals that drive the same state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Request a vote during leader election
    VoteRequest {
        from: MemberId,
        term: Term,
        candidate: MemberId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    /// Response to a vote request
    VoteResponse {
        from: MemberId,
        term: Term,
        vote_granted: bool,
    },
    /// Ask whether an election would succeed, without bumping anyone's term
    PreVoteRequest {
        from: MemberId,
        term: Term,
        candidate: MemberId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    PreVoteResponse {
        from: MemberId,
        term: Term,
        vote_granted: bool,
    },
    /// Replicate log entries
    AppendEntriesRequest {
        from: MemberId,
        leader_term: Term,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<RaftLogEntry>,
        leader_commit: LogIndex,
    },
    /// Response to AppendEntriesRequest
    AppendEntriesResponse {
        from: MemberId,
        term: Term,
        success: bool,
        /// last index known to match the leader's log
        match_index: LogIndex,
        /// follower's append index after handling the request
        append_index: LogIndex,
    },
    /// Leader liveness plus commit propagation
    Heartbeat {
        from: MemberId,
        leader_term: Term,
        commit_index: LogIndex,
        commit_index_term: Term,
    },
    HeartbeatResponse {
        from: MemberId,
    },
    /// Leader tells a follower that entries up to `prev_index` are pruned
    LogCompactionInfo {
        from: MemberId,
        leader_term: Term,
        prev_index: LogIndex,
    },
    /// Local tick: the election timer fired
    ElectionTimeout {
        from: MemberId,
    },
    /// Local tick: the leader heartbeat timer fired
    HeartbeatTimeout {
        from: MemberId,
    },
    /// Client proposal of a single replicated command
    NewEntryRequest {
        from: MemberId,
        content: Vec<u8>,
    },
    /// Client proposal of several commands appended together
    NewBatchRequest {
        from: MemberId,
        contents: Vec<Vec<u8>>,
    },
    /// Ask the log to compact up to `prune_index`
    PruneRequest {
        from: MemberId,
        prune_index: LogIndex,
    },
}

impl RaftMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            RaftMessage::VoteRequest { .. } => MessageType::VoteRequest,
            RaftMessage::VoteResponse { .. } => MessageType::VoteResponse,
            RaftMessage::PreVoteRequest { .. } => MessageType::PreVoteRequest,
            RaftMessage::PreVoteResponse { .. } => MessageType::PreVoteResponse,
            RaftMessage::AppendEntriesRequest { .. } => MessageType::AppendEntriesRequest,
            RaftMessage::AppendEntriesResponse { .. } => MessageType::AppendEntriesResponse,
            RaftMessage::Heartbeat { .. } => MessageType::Heartbeat,
            RaftMessage::HeartbeatResponse { .. } => MessageType::HeartbeatResponse,
            RaftMessage::LogCompactionInfo { .. } => MessageType::LogCompactionInfo,
            RaftMessage::ElectionTimeout { .. } => MessageType::ElectionTimeout,
            RaftMessage::HeartbeatTimeout { .. } => MessageType::HeartbeatTimeout,
            RaftMessage::NewEntryRequest { .. } => MessageType::NewEntryRequest,
            RaftMessage::NewBatchRequest { .. } => MessageType::NewBatchRequest,
            RaftMessage::PruneRequest { .. } => MessageType::PruneRequest,
        }
    }

    /// Sender of the message.
    pub fn from(&self) -> MemberId {
        match self {
            RaftMessage::VoteRequest { from, .. }
            | RaftMessage::VoteResponse { from, .. }
            | RaftMessage::PreVoteRequest { from, .. }
            | RaftMessage::PreVoteResponse { from, .. }
            | RaftMessage::AppendEntriesRequest { from, .. }
            | RaftMessage::AppendEntriesResponse { from, .. }
            | RaftMessage::Heartbeat { from, .. }
            | RaftMessage::HeartbeatResponse { from }
            | RaftMessage::LogCompactionInfo { from, .. }
            | RaftMessage::ElectionTimeout { from }
            | RaftMessage::HeartbeatTimeout { from }
            | RaftMessage::NewEntryRequest { from, .. }
            | RaftMessage::NewBatchRequest { from, .. }
            | RaftMessage::PruneRequest { from, .. } => *from,
        }
    }

    /// Term carried by the message, if it carries one.
    pub fn term(&self) -> Option<Term> {
        match self {
            RaftMessage::VoteRequest { term, .. }
            | RaftMessage::VoteResponse { term, .. }
            | RaftMessage::PreVoteRequest { term, .. }
            | RaftMessage::PreVoteResponse { term, .. }
            | RaftMessage::AppendEntriesResponse { term, .. } => Some(*term),
            RaftMessage::AppendEntriesRequest { leader_term, .. }
            | RaftMessage::Heartbeat { leader_term, .. }
            | RaftMessage::LogCompactionInfo { leader_term, .. } => Some(*leader_term),
            _ => None,
        }
    }

    /// Whether this is a local timer tick rather than something a peer sent.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RaftMessage::ElectionTimeout { .. } | RaftMessage::HeartbeatTimeout { .. }
        )
    }
}

/// A message addressed to one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, message: RaftMessage) -> Self {
        Self { to, message }
    }
}

/// A message tagged with the cluster it was sent for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdAwareMessage {
    pub cluster_id: ClusterId,
    pub message: RaftMessage,
}

impl ClusterIdAwareMessage {
    pub fn new(cluster_id: ClusterId, message: RaftMessage) -> Self {
        Self { cluster_id, message }
    }
}
