//! # directory
//!
//! why: all durable state of one raft group lives under a single directory that only one group may use
//! relations: opens segmented_log.rs and term_store.rs; the lock travels with the log until close
//! what: ClusterStateDirectory, StoreLock, unbind

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::segmented_log::SegmentedRaftLog;
use crate::term_store::FileTermStore;

const LOG_DIR: &str = "raft-log";
const LOCK_FILE: &str = "store.lock";

/// exclusive advisory lock on a cluster state directory
///
/// released when dropped
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// take the lock without blocking; `Locked` when someone else holds it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| StorageError::Locked(path.clone()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// on-disk home of one raft group
///
/// ```text
/// <root>/store.lock
/// <root>/term.state
/// <root>/raft-log/segment.<n>
/// <root>/raft-log/commit.state
/// ```
#[derive(Debug, Clone)]
pub struct ClusterStateDirectory {
    root: PathBuf,
}

impl ClusterStateDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// lock the directory and open the log and term store inside it
    ///
    /// the returned log owns the lock; closing it releases the directory
    pub fn open(&self, config: &StorageConfig) -> Result<(SegmentedRaftLog, FileTermStore), StorageError> {
        fs::create_dir_all(&self.root)?;
        let lock = StoreLock::acquire(self.lock_path())?;
        let term_store = FileTermStore::new(&self.root)?;
        let log = SegmentedRaftLog::open(self.log_dir(), config.clone())?.with_lock(lock);
        info!(root = %self.root.display(), "opened cluster state");
        Ok((log, term_store))
    }

    /// delete all consensus state of this group
    ///
    /// fails with `Locked` while a group still holds the directory
    pub fn unbind(&self) -> Result<(), StorageError> {
        if !self.root.exists() {
            return Ok(());
        }
        let lock = StoreLock::acquire(self.lock_path())?;

        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path == lock.path() {
                continue;
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        drop(lock);
        match fs::remove_file(self.lock_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fs::remove_dir(&self.root) {
            warn!(root = %self.root.display(), error = %e, "cluster state directory left behind");
        }
        info!(root = %self.root.display(), "unbound cluster state");
        Ok(())
    }
}
