//! # raft-storage
//!
//! why: a raft group must find its log, term and vote intact after a crash or restart
//! relations: implements raft-core's RaftLog and TermStore; opened by raft-transport's group runtime
//! what: SegmentedRaftLog, FileTermStore, ClusterStateDirectory with store lock and unbind

pub mod config;
pub mod directory;
pub mod error;
mod persist;
pub mod segment;
pub mod segmented_log;
pub mod term_store;

pub use config::StorageConfig;
pub use directory::{ClusterStateDirectory, StoreLock};
pub use error::StorageError;
pub use segmented_log::SegmentedRaftLog;
pub use term_store::FileTermStore;
