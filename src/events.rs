//! Everything related to receiving filesystem events from [`notify`].

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;

/// Default latency of the polling backend.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which mechanism is used to notice file changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WatchMode {
    /// Native notifications (inotify, kqueue, ...).
    #[default]
    Notify,
    /// Periodic rescans with the given interval.
    Poll(Duration),
}

pub(crate) type EventReceiver = mpsc::UnboundedReceiver<notify::Result<notify::Event>>;

/// Builds a watcher for `mode` whose events are proxied into the returned
/// channel.
pub(crate) fn new_watcher(
    mode: WatchMode,
) -> Result<(Box<dyn Watcher + Send>, EventReceiver), WatchError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |res: notify::Result<notify::Event>| {
        // The only way `send` can fail is if the receiver is dropped, which
        // only happens while the watcher itself is being torn down.
        let _ = tx.send(res);
    };

    let watcher: Box<dyn Watcher + Send> = match mode {
        WatchMode::Notify => Box::new(RecommendedWatcher::new(handler, Config::default())?),
        WatchMode::Poll(interval) => Box::new(PollWatcher::new(
            handler,
            Config::default().with_poll_interval(interval),
        )?),
    };

    Ok((watcher, rx))
}

/// Shared watcher for the files that are currently tailed.
///
/// Each file is watched through its parent directory, so a file that is
/// deleted and recreated keeps producing events. Directory watches are
/// reference counted: several files in one directory share a single watch,
/// which is released when the last of them is removed.
pub struct FileEvents {
    inner: Box<dyn Watcher + Send>,
    watched_directories: HashMap<PathBuf, usize>,
    event_stream: EventReceiver,
}

impl Debug for FileEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileEvents")
            .field("watched_directories", &self.watched_directories)
            .finish()
    }
}

impl FileEvents {
    /// Constructs a new `FileEvents` backed by native notifications.
    pub fn new() -> Result<Self, WatchError> {
        let (inner, event_stream) = new_watcher(WatchMode::Notify)?;

        Ok(FileEvents {
            inner,
            watched_directories: HashMap::new(),
            event_stream,
        })
    }

    fn add_directory(&mut self, path: &Path) -> Result<(), WatchError> {
        if let Some(count) = self.watched_directories.get_mut(path) {
            *count += 1;
            return Ok(());
        }

        self.inner.watch(path, RecursiveMode::NonRecursive)?;
        self.watched_directories.insert(path.to_path_buf(), 1);

        Ok(())
    }

    fn remove_directory(&mut self, path: &Path) {
        match self.watched_directories.get(path).copied() {
            None => {}
            Some(1) => {
                // Remove from map first in case `unwatch` fails.
                self.watched_directories.remove(path);
                // Fails if the directory itself is already gone, in which
                // case the kernel dropped the watch for us.
                if let Err(e) = self.inner.unwatch(path) {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "Failed to unwatch directory"
                    );
                }
            }
            Some(_) => {
                if let Some(count) = self.watched_directories.get_mut(path) {
                    *count -= 1;
                }
            }
        }
    }

    /// Starts delivering events for `path` by watching its parent directory.
    pub fn add_file(&mut self, path: &Path) -> Result<(), WatchError> {
        self.add_directory(parent_of(path))
    }

    /// Releases the watch taken by [`add_file`](Self::add_file).
    pub fn remove_file(&mut self, path: &Path) {
        self.remove_directory(parent_of(path));
    }

    /// Number of directories currently watched.
    pub fn watched_directories(&self) -> usize {
        self.watched_directories.len()
    }

    /// Waits for the next event. Returns `None` once the watcher is gone.
    pub async fn next_event(&mut self) -> Option<Result<notify::Event, WatchError>> {
        self.event_stream
            .recv()
            .await
            .map(|res| res.map_err(WatchError::from))
    }
}

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if parent != Path::new("") => parent,
        _ => Path::new("."),
    }
}
