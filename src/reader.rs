//! Everything related to following a single file and reading its lines.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Notify;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::TailError;

/// A single line read from a followed file.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Line {
    /// The path from where the line was read.
    source: PathBuf,
    /// The line, without its trailing newline.
    line: String,
}

impl Line {
    /// Returns a reference to the file from where the line was read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Returns a reference to the line.
    pub fn line(&self) -> &str {
        self.line.as_str()
    }

    /// Returns the internal components that make up a `Line`.
    pub fn into_inner(self) -> (PathBuf, String) {
        let Line { source, line } = self;

        (source, line)
    }
}

/// How a session learns that its file may have changed once it has read
/// everything available.
#[derive(Debug)]
pub enum Wakeup {
    /// Re-check the file on a fixed interval.
    Poll(Interval),
    /// Re-check whenever the paired [`Notify`] is signalled, typically by the
    /// coordinator relaying filesystem events.
    Signal(Arc<Notify>),
}

impl Wakeup {
    pub fn poll(every: Duration) -> Self {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Wakeup::Poll(interval)
    }

    /// Returns the wakeup together with the handle used to trigger it.
    pub fn signal() -> (Self, Arc<Notify>) {
        let notify = Arc::new(Notify::new());
        (Wakeup::Signal(Arc::clone(&notify)), notify)
    }

    async fn wait(&mut self) {
        match self {
            Wakeup::Poll(interval) => {
                interval.tick().await;
            }
            Wakeup::Signal(notify) => notify.notified().await,
        }
    }
}

/// Device and inode of an open file, used to notice that a path now refers
/// to a different file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FileId(u64, u64);

impl FileId {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(FileId(meta.dev(), meta.ino()))
    }

    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

type LineReader = BufReader<File>;

async fn new_linereader(
    path: &Path,
    seek_end: bool,
) -> io::Result<(LineReader, u64, Option<FileId>)> {
    let mut file = File::open(path).await?;
    let meta = file.metadata().await?;
    if meta.is_dir() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "path is a directory"));
    }

    let pos = if seek_end {
        file.seek(io::SeekFrom::End(0)).await?
    } else {
        0
    };

    Ok((BufReader::new(file), pos, FileId::of(&meta)))
}

/// One open, following read of one file.
///
/// Starts at the current end of the file and yields every complete line
/// appended afterwards. If the file is truncated, reading restarts at the
/// beginning; if it is deleted or replaced, the session waits for the path
/// to reappear and reads the new file from its start.
///
/// The session ends when its stop token is cancelled.
#[derive(Debug)]
pub struct TailSession {
    path: PathBuf,
    reader: LineReader,
    pos: u64,
    id: Option<FileId>,
    /// Set once the path no longer refers to the file behind `reader`.
    detached: bool,
    partial: Vec<u8>,
    wakeup: Wakeup,
    stop: CancellationToken,
}

impl TailSession {
    /// Opens `path` positioned at its end.
    pub async fn open(
        path: impl Into<PathBuf>,
        wakeup: Wakeup,
        stop: CancellationToken,
    ) -> Result<Self, TailError> {
        let path = path.into();
        let (reader, pos, id) = match new_linereader(&path, true).await {
            Ok(opened) => opened,
            Err(source) => return Err(TailError::Open { path, source }),
        };

        tracing::debug!(path = %path.display(), pos, "Opened tail session");

        Ok(TailSession {
            path,
            reader,
            pos,
            id,
            detached: false,
            partial: Vec::new(),
            wakeup,
            stop,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte in the current file.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Waits for the next complete line.
    ///
    /// Returns `Ok(None)` once the session has been stopped.
    pub async fn next_line(&mut self) -> Result<Option<Line>, TailError> {
        loop {
            if self.stop.is_cancelled() {
                return Ok(None);
            }

            let read = self
                .reader
                .read_until(b'\n', &mut self.partial)
                .await
                .map_err(|source| self.read_error(source))?;
            self.pos += read as u64;

            if self.partial.last() == Some(&b'\n') {
                return Ok(Some(self.take_line()));
            }
            if read > 0 {
                // Partial line at EOF; the next read tells if more arrived.
                continue;
            }

            if self.follow().await? {
                continue;
            }

            tokio::select! {
                biased;
                () = self.stop.cancelled() => return Ok(None),
                () = self.wakeup.wait() => {}
            }
        }
    }

    /// Turns the session into a stream that ends when the session is
    /// stopped or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Line, TailError>> {
        stream::unfold(Some(self), |state| async move {
            let mut session = state?;
            match session.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(session))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn take_line(&mut self) -> Line {
        let mut bytes = std::mem::take(&mut self.partial);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }

        Line {
            source: self.path.clone(),
            line: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// Called at end of file. Reopens or rewinds if the path was rotated or
    /// truncated, returning `true` if there may be something new to read.
    async fn follow(&mut self) -> Result<bool, TailError> {
        let meta = match metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.detached {
                    tracing::debug!(
                        path = %self.path.display(),
                        "Followed file removed, waiting for it to reappear"
                    );
                    self.detached = true;
                }
                return Ok(false);
            }
            Err(e) => return Err(self.read_error(e)),
        };

        if self.detached || FileId::of(&meta) != self.id || self.unlinked().await {
            return self.reopen().await;
        }

        if meta.len() < self.pos {
            tracing::debug!(
                path = %self.path.display(),
                old_pos = self.pos,
                new_len = meta.len(),
                "File truncated, reading from the start"
            );
            self.reader
                .seek(io::SeekFrom::Start(0))
                .await
                .map_err(|source| self.read_error(source))?;
            self.pos = 0;
            self.partial.clear();
            return Ok(true);
        }

        Ok(false)
    }

    /// Whether the file behind the open handle has lost its last link. Catches
    /// a delete-and-recreate that reused the inode between two checks.
    #[cfg(unix)]
    async fn unlinked(&self) -> bool {
        use std::os::unix::fs::MetadataExt;

        match self.reader.get_ref().metadata().await {
            Ok(meta) => meta.nlink() == 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    async fn unlinked(&self) -> bool {
        false
    }

    async fn reopen(&mut self) -> Result<bool, TailError> {
        let (reader, pos, id) = match new_linereader(&self.path, false).await {
            Ok(opened) => opened,
            // Gone again before we got to it; wait for the next change.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.read_error(e)),
        };

        if !self.partial.is_empty() {
            tracing::debug!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "Discarding unterminated line from rotated file"
            );
            self.partial.clear();
        }
        tracing::debug!(path = %self.path.display(), "File replaced, reopened from the start");

        self.reader = reader;
        self.pos = pos;
        self.id = id;
        self.detached = false;

        Ok(true)
    }

    fn read_error(&self, source: io::Error) -> TailError {
        TailError::Read {
            path: self.path.clone(),
            source,
        }
    }
}
