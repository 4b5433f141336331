//! # term_store
//!
//! why: a member must remember its term and vote across restarts
//! relations: implements raft_core::TermStore, files written through persist.rs
//! what: FileTermStore

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use raft_core::{MemberId, Term, TermStore};
use serde::{Deserialize, Serialize};

use crate::persist;

pub(crate) const TERM_STATE_FILE: &str = "term.state";

/// file-based term store
///
/// stores term and voted_for as json in `term.state`
#[derive(Debug)]
pub struct FileTermStore {
    /// directory path for storing the state file
    dir: PathBuf,
}

/// on-disk structure for term and vote
#[derive(Serialize, Deserialize, Default)]
struct TermState {
    term: Term,
    voted_for: Option<MemberId>,
}

impl FileTermStore {
    /// create a new filetermstore at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// get the path to the state file
    fn state_path(&self) -> PathBuf {
        self.dir.join(TERM_STATE_FILE)
    }
}

impl TermStore for FileTermStore {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> io::Result<()> {
        // a vote that isn't durable could be cast twice
        persist::write_json_atomic(&self.dir, TERM_STATE_FILE, &TermState { term, voted_for }, true)
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<MemberId>)> {
        // default for new members
        let state: TermState = persist::read_json(&self.state_path())?.unwrap_or_default();
        Ok((state.term, state.voted_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_loads_defaults() {
        let dir = tempdir().unwrap();
        let store = FileTermStore::new(dir.path()).unwrap();

        assert_eq!(store.load_term_and_vote().unwrap(), (0, None));
    }

    #[test]
    fn file_store_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let mut store = FileTermStore::new(dir.path()).unwrap();
            store.save_term_and_vote(7, Some(3)).unwrap();
        }

        let store = FileTermStore::new(dir.path()).unwrap();
        assert_eq!(store.load_term_and_vote().unwrap(), (7, Some(3)));
    }

    #[test]
    fn garbage_state_file_is_invalid_data() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(TERM_STATE_FILE), b"not json").unwrap();
        let store = FileTermStore::new(dir.path()).unwrap();

        let err = store.load_term_and_vote().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
