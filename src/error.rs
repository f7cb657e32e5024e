//! Error types.
//!
//! Components return these instead of halting; only [`crate::run`] and the
//! binary decide that an error ends the process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single tail session.
#[derive(Debug, Error)]
pub enum TailError {
    /// The file could not be opened when the session started.
    #[error("Failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// Reading or re-opening a followed file failed.
    #[error("Failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The output sink rejected a record.
    #[error("Failed to write record: {0}")]
    Output(#[source] io::Error),
}

impl TailError {
    /// Whether this failure should stop the whole process rather than just
    /// the session it happened in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TailError::Read { .. })
    }
}

/// Failures of the filesystem notification layer.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// An event the watcher should never deliver for the subscribed
    /// operations, such as an overflow rescan.
    #[error("Unexpected watch event: {0:?}")]
    UnexpectedEvent(notify::EventKind),
}

/// Top-level error returned by [`crate::run`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tail(#[from] TailError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
