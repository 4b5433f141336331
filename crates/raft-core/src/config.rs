//! # config
//!
//! why: collect the tunables of one raft group in a single serde-loadable struct
//! relations: read by node.rs (cache budgets, failure escalation) and the role handlers; loaded by raft-transport
//! what: RaftConfig with defaults and validation

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Consensus tunables. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout
    pub election_timeout_max: u64,
    /// How often a leader sends heartbeats
    pub heartbeat_interval: u64,
    /// Run a pre-election before bumping the term
    pub pre_vote: bool,
    /// Never start an election from this member
    pub refuse_to_be_leader: bool,
    /// Maximum entries shipped to a lagging follower per request
    pub catchup_batch_size: usize,
    pub in_flight_max_entries: usize,
    pub in_flight_max_bytes: usize,
    /// Consecutive durability failures before the group is taken out of service
    pub max_consecutive_io_failures: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            pre_vote: false,
            refuse_to_be_leader: false,
            catchup_batch_size: 64,
            in_flight_max_entries: 1024,
            in_flight_max_bytes: 8 * 1024 * 1024,
            max_consecutive_io_failures: 3,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min == 0 || self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout range {}..={} is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat interval {} must be positive and below the election timeout {}",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.catchup_batch_size == 0 {
            return Err(RaftError::InvalidConfig("catchup_batch_size must be positive".into()));
        }
        if self.max_consecutive_io_failures == 0 {
            return Err(RaftError::InvalidConfig(
                "max_consecutive_io_failures must be positive".into(),
            ));
        }
        Ok(())
    }
}
