//! Recursive directory watching that feeds the coordinator.
//!
//! [`DirectoryWatch`] subscribes to every directory root given on the
//! command line and turns file creations, writes and removals beneath them
//! into [`Command`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use crate::config::ExclusionRules;
use crate::coordinator::{ActivePaths, Command, CommandSender};
use crate::error::{Error, WatchError};
use crate::events::{new_watcher, EventReceiver, WatchMode};

/// Decides which paths may turn into commands.
#[derive(Clone, Debug, Default)]
pub struct WatchFilter {
    exclude: ExclusionRules,
}

impl WatchFilter {
    pub fn new(exclude: ExclusionRules) -> Self {
        WatchFilter { exclude }
    }

    /// Directories and excluded paths are never surfaced, whatever the event.
    pub fn admits(&self, path: &Path) -> bool {
        !path.is_dir() && !self.exclude.excludes(path)
    }
}

/// What an event means for one path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Change {
    Created,
    Written,
    Removed,
}

/// Maps a raw event to per-path changes. `Ok(None)` means the event is of a
/// kind that is not subscribed to.
fn changes(event: &Event) -> Result<Option<Vec<(Change, &Path)>>, WatchError> {
    let all = |change: Change| Some(every_path(event, change));

    let changes = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => None,
        EventKind::Create(_) => all(Change::Created),
        EventKind::Remove(_) => all(Change::Removed),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(Change::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(Change::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => Some(vec![
                (Change::Removed, from.as_path()),
                (Change::Created, to.as_path()),
            ]),
            _ => None,
        },
        EventKind::Modify(ModifyKind::Name(_)) => Some(
            event
                .paths
                .iter()
                .map(|p| {
                    let change = if p.exists() {
                        Change::Created
                    } else {
                        Change::Removed
                    };
                    (change, p.as_path())
                })
                .collect(),
        ),

        // The polling backend reports content changes as a new mtime.
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => {
            all(Change::Written)
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => all(Change::Written),

        EventKind::Access(_) => None,
        kind @ (EventKind::Any | EventKind::Other) => {
            return Err(WatchError::UnexpectedEvent(kind));
        }
    };

    Ok(changes)
}

fn every_path(event: &Event, change: Change) -> Vec<(Change, &Path)> {
    event.paths.iter().map(|p| (change, p.as_path())).collect()
}

/// Translates one event into the commands it calls for.
///
/// `is_active` reports whether a path is already being tailed; writes to such
/// paths are suppressed so a growing file does not flood the coordinator with
/// redundant starts. Creations always start, since a file recreated under a
/// tailed name may still look active until its pending stop is applied.
pub fn translate(
    event: &Event,
    filter: &WatchFilter,
    is_active: impl Fn(&Path) -> bool,
) -> Result<Vec<Command>, WatchError> {
    let Some(changes) = changes(event)? else {
        return Ok(Vec::new());
    };

    let commands = changes
        .into_iter()
        .filter(|(_, path)| filter.admits(path))
        .filter_map(|(change, path)| match change {
            Change::Written if is_active(path) => None,
            Change::Created | Change::Written => Some(Command::Start(path.to_path_buf())),
            Change::Removed => Some(Command::Stop(path.to_path_buf())),
        })
        .collect();

    Ok(commands)
}

/// A running recursive watch over a set of directory roots.
pub struct DirectoryWatch {
    watcher: Option<Box<dyn Watcher + Send>>,
    task: JoinHandle<Result<(), WatchError>>,
}

impl std::fmt::Debug for DirectoryWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatch")
            .field("open", &self.watcher.is_some())
            .finish()
    }
}

impl DirectoryWatch {
    /// Subscribes to every root and spawns the translation loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        roots: impl IntoIterator<Item = impl Into<PathBuf>>,
        filter: WatchFilter,
        mode: WatchMode,
        commands: CommandSender,
        active: ActivePaths,
    ) -> Result<Self, WatchError> {
        let (mut watcher, events) = new_watcher(mode)?;
        for root in roots {
            let root = root.into();
            watcher.watch(&root, RecursiveMode::Recursive)?;
            tracing::info!(path = %root.display(), "Watching directory");
        }

        let task = tokio::spawn(forward(events, filter, commands, active));

        Ok(DirectoryWatch {
            watcher: Some(watcher),
            task,
        })
    }

    /// Waits for the translation loop to end: with an error if the watcher
    /// failed, or cleanly after [`close`](Self::close) or once the
    /// coordinator stopped accepting commands.
    pub async fn join(&mut self) -> Result<(), Error> {
        (&mut self.task).await??;
        Ok(())
    }

    /// Drops the underlying watcher, which ends the translation loop.
    pub fn close(&mut self) {
        self.watcher.take();
    }
}

async fn forward(
    mut events: EventReceiver,
    filter: WatchFilter,
    commands: CommandSender,
    active: ActivePaths,
) -> Result<(), WatchError> {
    // Paths with a stop queued that the coordinator may not have applied yet.
    let mut stopping: HashSet<PathBuf> = HashSet::new();

    while let Some(res) = events.recv().await {
        let event = res?;
        tracing::trace!(?event, "Directory event");

        stopping.retain(|path| active.contains(path));
        let is_active = |path: &Path| !stopping.contains(path) && active.contains(path);

        for command in translate(&event, &filter, is_active)? {
            tracing::debug!(?command, "Queueing command");
            match &command {
                Command::Stop(path) => stopping.insert(path.clone()),
                Command::Start(path) => stopping.remove(path),
            };
            if commands.send(command).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    fn filter() -> WatchFilter {
        WatchFilter::new(ExclusionRules::parse(crate::config::DEFAULT_EXCLUDE))
    }

    fn never_active(_: &Path) -> bool {
        false
    }

    fn start(path: &str) -> Command {
        Command::Start(PathBuf::from(path))
    }

    fn stop(path: &str) -> Command {
        Command::Stop(PathBuf::from(path))
    }

    #[test]
    fn test_create_and_write_start() {
        let created = event(EventKind::Create(CreateKind::File), &["/srv/logs/app.log"]);
        assert_eq!(
            translate(&created, &filter(), never_active).unwrap(),
            [start("/srv/logs/app.log")]
        );

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/srv/logs/app.log"],
        );
        assert_eq!(
            translate(&written, &filter(), never_active).unwrap(),
            [start("/srv/logs/app.log")]
        );

        let polled = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/srv/logs/app.log"],
        );
        assert_eq!(
            translate(&polled, &filter(), never_active).unwrap(),
            [start("/srv/logs/app.log")]
        );
    }

    #[test]
    fn test_active_paths_suppress_start() {
        let active: HashSet<PathBuf> = [PathBuf::from("/srv/logs/app.log")].into();
        let is_active = |path: &Path| active.contains(path);

        let written = event(EventKind::Modify(ModifyKind::Any), &["/srv/logs/app.log"]);
        assert!(translate(&written, &filter(), is_active).unwrap().is_empty());

        // A creation may be a recreated file, so it always starts.
        let created = event(EventKind::Create(CreateKind::Any), &["/srv/logs/app.log"]);
        assert_eq!(
            translate(&created, &filter(), is_active).unwrap(),
            [start("/srv/logs/app.log")]
        );

        // Removal still stops it.
        let removed = event(EventKind::Remove(RemoveKind::File), &["/srv/logs/app.log"]);
        assert_eq!(
            translate(&removed, &filter(), is_active).unwrap(),
            [stop("/srv/logs/app.log")]
        );
    }

    #[test]
    fn test_remove_stops() {
        let removed = event(EventKind::Remove(RemoveKind::Any), &["/srv/logs/app.log"]);
        assert_eq!(
            translate(&removed, &filter(), never_active).unwrap(),
            [stop("/srv/logs/app.log")]
        );
    }

    #[test]
    fn test_excluded_paths_never_surface() {
        let kinds = [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            EventKind::Remove(RemoveKind::File),
        ];
        let paths = [
            "/srv/logs/app.log.gz",
            "/srv/logs/sasl/auth.log",
            "/srv/config/app.log",
            "/srv/logs/app.lock",
            "/srv/logs/user@host.log",
        ];

        for kind in kinds {
            for path in paths {
                let commands = translate(&event(kind, &[path]), &filter(), never_active).unwrap();
                assert!(commands.is_empty(), "{kind:?} on {path} gave {commands:?}");
            }
        }
    }

    #[test]
    fn test_directories_skipped() {
        let tmp_dir = TempDir::new().unwrap();
        let dir = tmp_dir.path().to_str().unwrap();

        // No exclusions, so only the directory check can drop it.
        let created = event(EventKind::Create(CreateKind::Any), &[dir]);
        let unfiltered = WatchFilter::default();
        assert!(translate(&created, &unfiltered, never_active).unwrap().is_empty());

        let folder = event(EventKind::Create(CreateKind::Folder), &["/srv/logs/new"]);
        assert!(translate(&folder, &filter(), never_active).unwrap().is_empty());

        let gone = event(EventKind::Remove(RemoveKind::Folder), &["/srv/logs/old"]);
        assert!(translate(&gone, &filter(), never_active).unwrap().is_empty());
    }

    #[test]
    fn test_renames() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/srv/logs/app.log", "/srv/logs/app.log.1"],
        );
        assert_eq!(
            translate(&both, &filter(), never_active).unwrap(),
            [stop("/srv/logs/app.log"), start("/srv/logs/app.log.1")]
        );

        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/srv/logs/app.log"],
        );
        assert_eq!(
            translate(&from, &filter(), never_active).unwrap(),
            [stop("/srv/logs/app.log")]
        );
    }

    #[test]
    fn test_ambiguous_rename_checks_existence() {
        let tmp_dir = TempDir::new().unwrap();
        let present = tmp_dir.path().join("present.log");
        std::fs::write(&present, "").unwrap();
        let absent = tmp_dir.path().join("absent.log");

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &[present.to_str().unwrap(), absent.to_str().unwrap()],
        );
        assert_eq!(
            translate(&renamed, &WatchFilter::default(), never_active).unwrap(),
            [Command::Start(present), Command::Stop(absent)]
        );
    }

    #[test]
    fn test_ignored_kinds() {
        let access = event(
            EventKind::Access(AccessKind::Close(notify::event::AccessMode::Write)),
            &["/srv/logs/app.log"],
        );
        assert!(translate(&access, &filter(), never_active).unwrap().is_empty());

        let chmod = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/srv/logs/app.log"],
        );
        assert!(translate(&chmod, &filter(), never_active).unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_kinds_fail() {
        for kind in [EventKind::Any, EventKind::Other] {
            let err = translate(&event(kind, &["/srv/logs/app.log"]), &filter(), never_active)
                .unwrap_err();
            assert!(matches!(err, WatchError::UnexpectedEvent(k) if k == kind));
        }
    }

    #[tokio::test]
    async fn test_close_ends_translation() {
        use crate::coordinator::Coordinator;
        use crate::format::Pipeline;
        use crate::sink::ChannelSink;
        use std::sync::Arc;
        use std::time::Duration;
        use tokio::time::timeout;
        use tokio_util::sync::CancellationToken;

        let tmp_dir = TempDir::new().unwrap();
        let (sink, _records) = ChannelSink::new();
        let (coordinator, commands) = Coordinator::new(
            WatchMode::Notify,
            Pipeline::default(),
            Arc::new(sink),
            CancellationToken::new(),
        )
        .unwrap();

        let mut watch = DirectoryWatch::spawn(
            [tmp_dir.path()],
            WatchFilter::default(),
            WatchMode::Notify,
            commands,
            coordinator.active_paths(),
        )
        .unwrap();

        watch.close();
        timeout(Duration::from_secs(5), watch.join())
            .await
            .expect("translation loop did not end after close")
            .unwrap();

        // The loop held the last sender; with it gone an idle coordinator ends.
        timeout(Duration::from_secs(5), coordinator.run())
            .await
            .unwrap()
            .unwrap();
    }
}
