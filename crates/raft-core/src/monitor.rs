//! # monitor
//!
//! why: let the embedding application observe the group and consume committed entries
//! relations: called by node.rs; implemented by raft-transport's runtime
//! what: RaftMonitor hooks, NoopMonitor, CommitListener

use crate::error::{RaftError, Result};
use crate::log::{LogIndex, Term};
use crate::message::MemberId;
use crate::node::NodeState;

/// Observation hooks. Every method defaults to doing nothing.
pub trait RaftMonitor: Send {
    fn term_changed(&mut self, _term: Term) {}

    fn role_changed(&mut self, _role: NodeState, _leader: Option<MemberId>) {}

    fn commit_index_advanced(&mut self, _commit_index: LogIndex) {}

    /// A log command failed; `consecutive` counts failures since the last success.
    fn append_failed(&mut self, _error: &RaftError, _consecutive: u32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl RaftMonitor for NoopMonitor {}

/// Receives committed entries in index order.
///
/// Delivery is at least once: an entry whose callback failed is offered again
/// on the next delivery round.
pub trait CommitListener {
    fn on_committed(&mut self, index: LogIndex, content: &[u8]) -> Result<()>;
}

impl<F> CommitListener for F
where
    F: FnMut(LogIndex, &[u8]) -> Result<()>,
{
    fn on_committed(&mut self, index: LogIndex, content: &[u8]) -> Result<()> {
        self(index, content)
    }
}
