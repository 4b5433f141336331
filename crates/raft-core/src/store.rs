//! # store
//!
//! why: term and vote must survive restarts or a member could vote twice in one term
//! relations: written by node.rs before any outcome is acted on; FileTermStore lives in raft-storage
//! what: TermStore trait, InMemoryTermStore for testing

use std::io;

use crate::log::Term;
use crate::message::MemberId;

/// durable storage of the current term and vote
pub trait TermStore {
    /// persist the current term and voted_for; must be durable on return
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()>;

    /// load the persisted term and voted_for, `(0, None)` for a fresh member
    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)>;
}

/// in-memory term store for testing
///
/// no persistence across restarts
#[derive(Debug, Default, Clone)]
pub struct InMemoryTermStore {
    term: Term,
    voted_for: Option<MemberId>,
}

impl InMemoryTermStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TermStore for InMemoryTermStore {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)> {
        Ok((self.term, self.voted_for))
    }
}
