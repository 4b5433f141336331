//! # raft-core
//!
//! why: implement the raft consensus core in pure, synchronous rust
//! relations: raft-storage provides the durable log and term store, raft-transport frames messages and runs groups
//! what: replicated log contract, in-flight cache, log commands, role handlers, apply step

pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod monitor;
pub mod node;
pub mod outcome;
pub mod roles;
pub mod state;
pub mod store;

pub use cache::{CacheSnapshot, CachedLogReader, InFlightCache};
pub use command::RaftLogCommand;
pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use log::{InMemoryRaftLog, LogIndex, RaftLog, RaftLogEntry, ReadableRaftLog, Term, NO_INDEX};
pub use message::{ClusterId, ClusterIdAwareMessage, Directed, MemberId, MessageType, RaftMessage};
pub use monitor::{CommitListener, NoopMonitor, RaftMonitor};
pub use node::{HandleResult, NodeState, RaftNode};
pub use outcome::Outcome;
pub use state::{FollowerState, RaftState};
pub use store::{InMemoryTermStore, TermStore};
