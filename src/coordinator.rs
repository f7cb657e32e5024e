//! The tail lifecycle coordinator.
//!
//! A [`Coordinator`] owns the registry of running tail sessions. Every change
//! to that registry arrives as a [`Command`] on one ordered channel and is
//! applied by a single loop, so two commands for the same path can never race.
//! Lines are streamed concurrently, one task per session.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::pin_mut;
use futures_util::stream::StreamExt;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::normalize;
use crate::error::{Error, TailError, WatchError};
use crate::events::{FileEvents, WatchMode, DEFAULT_POLL_INTERVAL};
use crate::format::Pipeline;
use crate::reader::{TailSession, Wakeup};
use crate::sink::Sink;

/// An intended change to the set of tailed files.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Command {
    Start(PathBuf),
    Stop(PathBuf),
}

impl Command {
    pub fn path(&self) -> &Path {
        match self {
            Command::Start(path) | Command::Stop(path) => path,
        }
    }
}

/// Sending half of the coordinator's command channel.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queues `command`. Fails only once the coordinator has stopped.
    pub fn send(&self, command: Command) -> Result<(), SendError<Command>> {
        self.tx.send(command)
    }

    pub fn start(&self, path: impl Into<PathBuf>) -> Result<(), SendError<Command>> {
        self.send(Command::Start(path.into()))
    }

    pub fn stop(&self, path: impl Into<PathBuf>) -> Result<(), SendError<Command>> {
        self.send(Command::Stop(path.into()))
    }
}

/// Read-only view of the paths the coordinator is currently tailing.
///
/// Updated by the coordinator after every registry change. Lets other tasks
/// skip commands that would be no-ops without touching the registry itself.
#[derive(Clone, Debug)]
pub struct ActivePaths {
    rx: watch::Receiver<HashSet<PathBuf>>,
}

impl ActivePaths {
    pub fn contains(&self, path: &Path) -> bool {
        self.rx.borrow().contains(path)
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.borrow().is_empty()
    }

    /// Waits until `predicate` holds for the active set. Returns `false` if
    /// the coordinator was dropped first.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&HashSet<PathBuf>) -> bool) -> bool {
        self.rx.wait_for(predicate).await.is_ok()
    }
}

/// Registry entry for a running session.
#[derive(Debug)]
struct ActiveTail {
    generation: u64,
    stop: CancellationToken,
    /// Present in [`WatchMode::Notify`], where the coordinator relays file
    /// events to the session.
    wake: Option<Arc<Notify>>,
}

/// Which registry entry a session task was spawned for.
#[derive(Debug)]
struct TaskOwner {
    path: PathBuf,
    generation: u64,
}

/// Owns the registry of running tail sessions.
pub struct Coordinator {
    mode: WatchMode,
    pipeline: Pipeline,
    sink: Arc<dyn Sink>,
    registry: HashMap<PathBuf, ActiveTail>,
    tasks: JoinSet<Result<(), TailError>>,
    owners: HashMap<Id, TaskOwner>,
    /// Parent-directory watches for event-driven sessions.
    events: Option<FileEvents>,
    active: watch::Sender<HashSet<PathBuf>>,
    commands: mpsc::UnboundedReceiver<Command>,
    accepting: bool,
    shutdown: CancellationToken,
    next_generation: u64,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("mode", &self.mode)
            .field("pipeline", &self.pipeline)
            .field("registry", &self.registry)
            .field("events", &self.events)
            .field("accepting", &self.accepting)
            .finish()
    }
}

impl Coordinator {
    /// Creates a coordinator and the sender feeding it.
    ///
    /// Cancelling `shutdown` stops every session and ends [`run`](Self::run).
    pub fn new(
        mode: WatchMode,
        pipeline: Pipeline,
        sink: Arc<dyn Sink>,
        shutdown: CancellationToken,
    ) -> Result<(Self, CommandSender), WatchError> {
        let events = match mode {
            WatchMode::Notify => Some(FileEvents::new()?),
            WatchMode::Poll(_) => None,
        };
        let (tx, commands) = mpsc::unbounded_channel();
        let (active, _) = watch::channel(HashSet::new());

        let coordinator = Coordinator {
            mode,
            pipeline,
            sink,
            registry: HashMap::new(),
            tasks: JoinSet::new(),
            owners: HashMap::new(),
            events,
            active,
            commands,
            accepting: true,
            shutdown,
            next_generation: 0,
        };

        Ok((coordinator, CommandSender { tx }))
    }

    fn poll_interval(&self) -> Duration {
        match self.mode {
            WatchMode::Poll(interval) => interval,
            WatchMode::Notify => DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn active_paths(&self) -> ActivePaths {
        ActivePaths {
            rx: self.active.subscribe(),
        }
    }

    pub fn is_tailing(&self, path: &Path) -> bool {
        self.registry.contains_key(&normalize(path))
    }

    /// Number of running sessions.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Applies one command to the registry.
    ///
    /// Only a session that cannot be opened (or watched) is an error; a
    /// redundant start or stop is a no-op.
    pub async fn apply(&mut self, command: Command) -> Result<(), Error> {
        match command {
            Command::Start(path) => self.start(normalize(&path)).await,
            Command::Stop(path) => {
                self.stop(&normalize(&path));
                Ok(())
            }
        }
    }

    async fn start(&mut self, path: PathBuf) -> Result<(), Error> {
        if self.registry.contains_key(&path) {
            tracing::debug!(path = %path.display(), "Already tailing");
            return Ok(());
        }

        // Watch before opening so nothing appended in between goes unnoticed.
        let interval = self.poll_interval();
        let (wakeup, wake) = match self.events.as_mut() {
            Some(events) => {
                events.add_file(&path)?;
                let (wakeup, wake) = Wakeup::signal();
                (wakeup, Some(wake))
            }
            None => (Wakeup::poll(interval), None),
        };

        let stop = self.shutdown.child_token();
        let session = match TailSession::open(&path, wakeup, stop.clone()).await {
            Ok(session) => session,
            Err(e) => {
                if let Some(events) = self.events.as_mut() {
                    events.remove_file(&path);
                }
                return Err(e.into());
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        self.registry.insert(
            path.clone(),
            ActiveTail {
                generation,
                stop,
                wake,
            },
        );
        self.active.send_modify(|active| {
            active.insert(path.clone());
        });

        tracing::info!(path = %path.display(), "Started tailing");

        let pipeline = self.pipeline;
        let sink = Arc::clone(&self.sink);
        let task = self.tasks.spawn(pump(session, pipeline, sink));
        self.owners.insert(task.id(), TaskOwner { path, generation });

        Ok(())
    }

    fn stop(&mut self, path: &Path) {
        let Some(tail) = self.registry.remove(path) else {
            tracing::debug!(path = %path.display(), "Not tailing, nothing to stop");
            return;
        };

        tail.stop.cancel();
        self.release(path);

        tracing::info!(path = %path.display(), "Stopped tailing");
    }

    /// Drops the bookkeeping that outlives a registry entry.
    fn release(&mut self, path: &Path) {
        if let Some(events) = self.events.as_mut() {
            events.remove_file(path);
        }
        self.active.send_modify(|active| {
            active.remove(path);
        });
    }

    /// Handles a finished session task. Fatal session errors are returned.
    fn reap(
        &mut self,
        joined: Result<(Id, Result<(), TailError>), JoinError>,
    ) -> Result<(), Error> {
        let (id, result) = match joined {
            Ok((id, result)) => (id, Some(result)),
            Err(e) => (e.id(), if e.is_panic() { None } else { Some(Ok(())) }),
        };
        let Some(owner) = self.owners.remove(&id) else {
            return Ok(());
        };

        // A stopped session's exit may arrive after a new session for the
        // same path was started; only remove the entry it owned.
        let owned = self
            .registry
            .get(&owner.path)
            .is_some_and(|tail| tail.generation == owner.generation);
        if owned {
            self.registry.remove(&owner.path);
            self.release(&owner.path);
        }

        match result {
            None => {
                tracing::error!(path = %owner.path.display(), "Tail task panicked");
                Ok(())
            }
            Some(Ok(())) => Ok(()),
            Some(Err(e)) if e.is_fatal() => Err(e.into()),
            Some(Err(e)) => {
                tracing::error!(
                    path = %owner.path.display(),
                    error = %e,
                    "Tail session failed"
                );
                Ok(())
            }
        }
    }

    /// Wakes the sessions an event refers to.
    fn dispatch(&self, event: &notify::Event) {
        for path in &event.paths {
            if let Some(wake) = self.registry.get(path).and_then(|tail| tail.wake.as_ref()) {
                wake.notify_one();
            }
        }
    }

    /// Runs until `shutdown` is cancelled, a fatal error occurs, or every
    /// [`CommandSender`] is gone and no session is left.
    ///
    /// All session tasks are stopped and joined before this returns.
    pub async fn run(mut self) -> Result<(), Error> {
        let result = self.serve().await;
        self.shutdown().await;
        result
    }

    async fn serve(&mut self) -> Result<(), Error> {
        loop {
            if !self.accepting && self.registry.is_empty() {
                tracing::debug!("Command channel closed and no session left");
                return Ok(());
            }

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => return Ok(()),

                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.reap(joined)?;
                }

                // Commands go first so a busy directory cannot hold them back.
                command = self.commands.recv(), if self.accepting => match command {
                    Some(command) => self.apply(command).await?,
                    None => self.accepting = false,
                },

                Some(event) = next_file_event(&mut self.events) => {
                    self.dispatch(&event?);
                }
            }
        }
    }

    /// Stops every session and waits for all tasks to finish.
    pub async fn shutdown(&mut self) {
        let paths: Vec<PathBuf> = self.registry.keys().cloned().collect();
        for path in paths {
            self.stop(&path);
        }

        while let Some(joined) = self.tasks.join_next_with_id().await {
            if let Err(e) = self.reap(joined) {
                tracing::error!(error = %e, "Tail session failed during shutdown");
            }
        }
    }
}

async fn next_file_event(
    events: &mut Option<FileEvents>,
) -> Option<Result<notify::Event, WatchError>> {
    match events {
        Some(events) => events.next_event().await,
        None => std::future::pending().await,
    }
}

/// Streams one session's lines through the pipeline into the sink.
async fn pump(
    session: TailSession,
    pipeline: Pipeline,
    sink: Arc<dyn Sink>,
) -> Result<(), TailError> {
    let lines = session.into_stream();
    pin_mut!(lines);

    while let Some(line) = lines.next().await {
        let line = line?;
        if let Some(record) = pipeline.render(line.source(), line.line()) {
            sink.emit(&record).map_err(TailError::Output)?;
        }
    }

    Ok(())
}
