//! # node
//!
//! why: own the log, cache and durable term of one member and apply outcomes atomically
//! relations: asks roles/ what to do, applies command.rs through log.rs + cache.rs, persists via store.rs
//! what: NodeState enum, RaftNode apply step, committed-entry delivery

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{CachedLogReader, InFlightCache};
use crate::command::RaftLogCommand;
use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::{LogIndex, RaftLog, ReadableRaftLog, Term};
use crate::message::{Directed, MemberId, RaftMessage};
use crate::monitor::{CommitListener, NoopMonitor, RaftMonitor};
use crate::outcome::Outcome;
use crate::roles;
use crate::state::RaftState;
use crate::store::TermStore;

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// What the caller has to do after a message was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleResult {
    /// Messages to send, released only after the log writes succeeded
    pub outgoing: Vec<Directed>,
    pub renew_election_timeout: bool,
    pub snapshot_required: bool,
}

/// A single Raft member: consensus state plus the storage it drives.
pub struct RaftNode<L: RaftLog, S: TermStore> {
    state: RaftState,
    log: L,
    cache: InFlightCache,
    store: S,
    config: RaftConfig,
    monitor: Box<dyn RaftMonitor>,
    /// Highest committed index handed to the commit listener
    last_applied: LogIndex,
    consecutive_failures: u32,
    available: bool,
}

impl<L: RaftLog, S: TermStore> RaftNode<L, S> {
    /// Create a member from recovered storage. Starts as follower with the
    /// persisted term and vote.
    pub fn new(
        myself: MemberId,
        members: impl IntoIterator<Item = MemberId>,
        log: L,
        store: S,
        config: RaftConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (term, voted_for) = store.load_term_and_vote()?;

        let mut state = RaftState::new(myself, members);
        state.term = term;
        state.voted_for = voted_for;
        state.leader_commit = log.commit_index();

        info!(
            member = myself,
            term,
            append_index = log.append_index(),
            commit_index = log.commit_index(),
            "raft member started"
        );

        Ok(Self {
            state,
            cache: InFlightCache::new(config.in_flight_max_entries, config.in_flight_max_bytes),
            // pruned entries were consumed before they could be pruned
            last_applied: log.prev_index(),
            log,
            store,
            config,
            monitor: Box::new(NoopMonitor),
            consecutive_failures: 0,
            available: true,
        })
    }

    pub fn with_monitor(mut self, monitor: Box<dyn RaftMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Resume committed delivery after `index`, which the application has
    /// already applied.
    pub fn with_last_applied(mut self, index: LogIndex) -> Self {
        self.last_applied = index.max(self.log.prev_index());
        self
    }

    pub fn myself(&self) -> MemberId {
        self.state.myself
    }

    pub fn state(&self) -> &RaftState {
        &self.state
    }

    pub fn role(&self) -> NodeState {
        self.state.role
    }

    pub fn term(&self) -> Term {
        self.state.term
    }

    pub fn leader(&self) -> Option<MemberId> {
        self.state.leader
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn cache(&self) -> &InFlightCache {
        &self.cache
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Process one message: decide, persist, apply, then release.
    ///
    /// On error nothing from the outcome becomes visible: state is not
    /// updated and no message is sent.
    pub fn handle(&mut self, message: RaftMessage) -> Result<HandleResult> {
        self.ensure_available()?;

        let outcome = {
            let reader = CachedLogReader::new(&self.cache, &self.log);
            roles::handle(&self.state, &message, &reader, &self.config)?
        };
        self.apply(outcome)
    }

    fn apply(&mut self, outcome: Outcome) -> Result<HandleResult> {
        let commit_before = self.log.commit_index();

        if let Err(err) = self.persist_and_apply(&outcome) {
            return Err(self.record_failure(err));
        }
        self.consecutive_failures = 0;

        if outcome.term != self.state.term {
            self.monitor.term_changed(outcome.term);
        }
        if outcome.role != self.state.role || outcome.leader != self.state.leader {
            info!(
                member = self.state.myself,
                term = outcome.term,
                role = ?outcome.role,
                leader = ?outcome.leader,
                "role changed"
            );
            self.monitor.role_changed(outcome.role, outcome.leader);
        }
        if self.log.commit_index() > commit_before {
            self.monitor.commit_index_advanced(self.log.commit_index());
        }

        self.state.update(&outcome);
        Ok(HandleResult {
            outgoing: outcome.outgoing,
            renew_election_timeout: outcome.renew_election_timeout,
            snapshot_required: outcome.snapshot_required,
        })
    }

    fn persist_and_apply(&mut self, outcome: &Outcome) -> Result<()> {
        if outcome.changes_term_or_vote(&self.state) {
            self.store.save_term_and_vote(outcome.term, outcome.voted_for)?;
        }
        for command in &outcome.log_commands {
            command.apply_to(&mut self.log, &mut self.cache)?;
        }
        Ok(())
    }

    fn record_failure(&mut self, err: RaftError) -> RaftError {
        if !err.is_durability_failure() {
            error!(member = self.state.myself, error = %err, "log command rejected");
            self.monitor.append_failed(&err, self.consecutive_failures);
            return err;
        }

        self.consecutive_failures += 1;
        warn!(
            member = self.state.myself,
            error = %err,
            consecutive = self.consecutive_failures,
            "durable write failed"
        );
        self.monitor.append_failed(&err, self.consecutive_failures);

        if self.consecutive_failures >= self.config.max_consecutive_io_failures {
            error!(
                member = self.state.myself,
                failures = self.consecutive_failures,
                "too many durability failures, raft group taken out of service"
            );
            self.available = false;
            return RaftError::Unavailable { failures: self.consecutive_failures };
        }
        err
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(RaftError::Unavailable { failures: self.consecutive_failures })
        }
    }

    /// Hand every committed, not yet applied entry to `listener` in index
    /// order and return how many were delivered. Barriers are skipped.
    ///
    /// An entry counts as applied only once the listener returned `Ok`, so a
    /// failed entry is offered again on the next call.
    pub fn deliver_committed(&mut self, listener: &mut dyn CommitListener) -> Result<usize> {
        self.ensure_available()?;

        let commit_index = self.log.commit_index();
        let applied_before = self.last_applied;
        let mut delivered = 0;

        while self.last_applied < commit_index {
            let index = self.last_applied + 1;
            let entry = CachedLogReader::new(&self.cache, &self.log).read_entry(index)?;
            if !entry.is_barrier() {
                listener.on_committed(index, &entry.content)?;
                delivered += 1;
            }
            self.last_applied = index;
        }

        if self.last_applied > applied_before {
            debug!(member = self.state.myself, last_applied = self.last_applied, delivered, "committed entries delivered");
            RaftLogCommand::EvictInFlight { up_to: self.last_applied }.apply_to(&mut self.log, &mut self.cache)?;
        }
        Ok(delivered)
    }

    /// Continue the log after a snapshot taken at `(index, term)` was
    /// installed by the application.
    pub fn install_snapshot(&mut self, index: LogIndex, term: Term) -> Result<()> {
        self.ensure_available()?;
        self.log.skip(index, term)?;
        self.cache.clear();
        self.last_applied = self.last_applied.max(index);
        info!(member = self.state.myself, index, term, "log continues after installed snapshot");
        Ok(())
    }

    /// Release the log's resources; the node must not be used afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.log.close()
    }
}
