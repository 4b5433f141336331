//! # runtime
//!
//! why: every raft group needs exactly one thread of control that owns its node, log and timers
//! relations: owns a raft_core::RaftNode; fed by connection.rs through crossbeam channels; sends through an Outbound
//! what: spawn_group, RaftGroupHandle, Outbound, GroupStatus
//!
//! The worker waits on its control and inbound channels with
//! `crossbeam_channel::select!`, firing the election timer after a randomized
//! delay and the heartbeat timer while leader.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng;
use raft_core::{
    ClusterId, ClusterIdAwareMessage, CommitListener, LogIndex, MemberId, NodeState, RaftConfig,
    RaftError, RaftLog, RaftMessage, RaftNode, Term, TermStore,
};
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};

/// where the worker sends messages for other members
pub trait Outbound: Send + 'static {
    fn send(&mut self, to: MemberId, message: RaftMessage);
}

impl<F> Outbound for F
where
    F: FnMut(MemberId, RaftMessage) + Send + 'static,
{
    fn send(&mut self, to: MemberId, message: RaftMessage) {
        self(to, message)
    }
}

/// point-in-time view of a running group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub member: MemberId,
    pub role: NodeState,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub append_index: LogIndex,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

enum Control {
    Propose(Vec<Vec<u8>>),
    Status(Sender<GroupStatus>),
    Shutdown,
}

/// handle for talking to a running raft group
///
/// dropping the handle stops the worker as well; `shutdown` additionally
/// waits for it and reports how it ended
pub struct RaftGroupHandle {
    member: MemberId,
    cluster_id: ClusterId,
    inbound: Sender<ClusterIdAwareMessage>,
    control: Sender<Control>,
    worker: Option<JoinHandle<TransportResult<()>>>,
}

impl RaftGroupHandle {
    pub fn member(&self) -> MemberId {
        self.member
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// sender for connection readers feeding this group
    pub fn inbound(&self) -> Sender<ClusterIdAwareMessage> {
        self.inbound.clone()
    }

    /// submit one command; only a leader appends it, anyone else drops it
    pub fn propose(&self, content: Vec<u8>) -> TransportResult<()> {
        self.propose_batch(vec![content])
    }

    pub fn propose_batch(&self, contents: Vec<Vec<u8>>) -> TransportResult<()> {
        self.control
            .send(Control::Propose(contents))
            .map_err(|_| TransportError::WorkerStopped)
    }

    pub fn status(&self) -> TransportResult<GroupStatus> {
        let (tx, rx) = bounded(1);
        self.control.send(Control::Status(tx)).map_err(|_| TransportError::WorkerStopped)?;
        rx.recv().map_err(|_| TransportError::WorkerStopped)
    }

    /// stop the worker and close the log, releasing its files
    pub fn shutdown(mut self) -> TransportResult<()> {
        let _ = self.control.send(Control::Shutdown);
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| TransportError::WorkerStopped)?,
            None => Ok(()),
        }
    }
}

/// start the consensus worker thread of one raft group
pub fn spawn_group<L, S, O, C>(
    node: RaftNode<L, S>,
    cluster_id: ClusterId,
    transport: &TransportConfig,
    outbound: O,
    listener: C,
) -> TransportResult<RaftGroupHandle>
where
    L: RaftLog + Send + 'static,
    S: TermStore + Send + 'static,
    O: Outbound,
    C: CommitListener + Send + 'static,
{
    transport.validate()?;
    let member = node.myself();
    let (inbound_tx, inbound_rx) = bounded(transport.inbound_queue_depth);
    let (control_tx, control_rx) = bounded(transport.inbound_queue_depth);

    let worker = Worker {
        election_deadline: Instant::now() + election_timeout(node.config()),
        heartbeat_deadline: None,
        node,
        cluster_id,
        outbound,
        listener,
        inbound: inbound_rx,
        control: control_rx,
    };
    let thread = thread::Builder::new()
        .name(format!("raft-group-{member}"))
        .spawn(move || worker.run())?;

    info!(member, cluster = %cluster_id, "raft group started");
    Ok(RaftGroupHandle {
        member,
        cluster_id,
        inbound: inbound_tx,
        control: control_tx,
        worker: Some(thread),
    })
}

fn election_timeout(config: &RaftConfig) -> Duration {
    let millis = rand::thread_rng().gen_range(config.election_timeout_min..=config.election_timeout_max);
    Duration::from_millis(millis)
}

struct Worker<L: RaftLog, S: TermStore, O, C> {
    node: RaftNode<L, S>,
    cluster_id: ClusterId,
    outbound: O,
    listener: C,
    inbound: Receiver<ClusterIdAwareMessage>,
    control: Receiver<Control>,
    election_deadline: Instant,
    heartbeat_deadline: Option<Instant>,
}

impl<L, S, O, C> Worker<L, S, O, C>
where
    L: RaftLog,
    S: TermStore,
    O: Outbound,
    C: CommitListener,
{
    fn run(mut self) -> TransportResult<()> {
        let result = self.event_loop();
        if let Err(err) = self.node.close() {
            warn!(member = self.node.myself(), error = %err, "closing the raft log failed");
        }
        info!(member = self.node.myself(), "raft group stopped");
        result
    }

    fn event_loop(&mut self) -> TransportResult<()> {
        loop {
            let next_deadline = match self.heartbeat_deadline {
                Some(heartbeat) => heartbeat.min(self.election_deadline),
                None => self.election_deadline,
            };
            let timeout = next_deadline.saturating_duration_since(Instant::now());

            crossbeam_channel::select! {
                recv(self.control) -> control => match control {
                    Ok(Control::Propose(contents)) => {
                        let from = self.node.myself();
                        self.step(RaftMessage::NewBatchRequest { from, contents })?;
                    }
                    Ok(Control::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Ok(Control::Shutdown) | Err(_) => return Ok(()),
                },
                recv(self.inbound) -> message => match message {
                    Ok(message) if message.cluster_id == self.cluster_id => self.step(message.message)?,
                    Ok(message) => {
                        warn!(
                            member = self.node.myself(),
                            received = %message.cluster_id,
                            "dropping message for another cluster"
                        );
                    }
                    Err(_) => return Ok(()),
                },
                default(timeout) => {}
            }

            let now = Instant::now();
            if now >= self.election_deadline {
                self.election_deadline = now + election_timeout(self.node.config());
                let from = self.node.myself();
                self.step(RaftMessage::ElectionTimeout { from })?;
            }
            if matches!(self.heartbeat_deadline, Some(deadline) if now >= deadline) {
                let from = self.node.myself();
                self.step(RaftMessage::HeartbeatTimeout { from })?;
            }
        }
    }

    /// hand one message to the node; only an unavailable group stops the worker
    fn step(&mut self, message: RaftMessage) -> TransportResult<()> {
        let message_type = message.message_type();
        match self.node.handle(message) {
            Ok(result) => {
                if result.renew_election_timeout {
                    self.election_deadline = Instant::now() + election_timeout(self.node.config());
                }
                if result.snapshot_required {
                    warn!(member = self.node.myself(), "leader pruned entries this member still needs, snapshot required");
                }
                for directed in result.outgoing {
                    self.outbound.send(directed.to, directed.message);
                }
            }
            Err(err @ RaftError::Unavailable { .. }) => {
                error!(member = self.node.myself(), error = %err, "raft group out of service");
                return Err(err.into());
            }
            Err(err) => {
                warn!(member = self.node.myself(), ?message_type, error = %err, "message not applied");
            }
        }

        self.heartbeat_deadline = match (self.node.role(), self.heartbeat_deadline) {
            (NodeState::Leader, Some(deadline)) if deadline > Instant::now() => Some(deadline),
            (NodeState::Leader, _) => {
                Some(Instant::now() + Duration::from_millis(self.node.config().heartbeat_interval))
            }
            _ => None,
        };

        match self.node.deliver_committed(&mut self.listener) {
            Ok(0) => {}
            Ok(delivered) => debug!(member = self.node.myself(), delivered, "committed entries applied"),
            Err(err @ RaftError::Unavailable { .. }) => return Err(err.into()),
            Err(err) => warn!(member = self.node.myself(), error = %err, "commit listener failed, will retry"),
        }
        Ok(())
    }

    fn status(&self) -> GroupStatus {
        GroupStatus {
            member: self.node.myself(),
            role: self.node.role(),
            term: self.node.term(),
            leader: self.node.leader(),
            append_index: self.node.log().append_index(),
            commit_index: self.node.log().commit_index(),
            last_applied: self.node.last_applied(),
        }
    }
}
