//! # roles
//!
//! why: keep each role's message handling pure so it can be tested without io
//! relations: reads state.rs and a ReadableRaftLog, produces an outcome.rs value for node.rs
//! what: dispatch on the current role

mod appending;
mod candidate;
mod election;
mod follower;
mod leader;

pub use appending::log_history_matches;
pub use election::log_is_up_to_date;

use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::ReadableRaftLog;
use crate::message::RaftMessage;
use crate::node::NodeState;
use crate::outcome::Outcome;
use crate::state::RaftState;

/// Decide how `state` reacts to `message`. Nothing is mutated; the returned
/// outcome carries every change.
pub fn handle(
    state: &RaftState,
    message: &RaftMessage,
    log: &dyn ReadableRaftLog,
    config: &RaftConfig,
) -> Result<Outcome> {
    let mut outcome = Outcome::new(state);
    match state.role {
        NodeState::Follower => follower::handle(state, &mut outcome, message, log, config)?,
        NodeState::Candidate => candidate::handle(state, &mut outcome, message, log, config)?,
        NodeState::Leader => leader::handle(state, &mut outcome, message, log, config)?,
    }
    Ok(outcome)
}
