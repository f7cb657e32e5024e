//! Wires configuration, coordinator and directory watch together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::sink::Sink;
use crate::watch::{DirectoryWatch, WatchFilter};

enum Finished {
    Coordinator(Result<(), Error>),
    Watch(Result<(), Error>),
}

/// Tails everything `config` names into `sink` until `shutdown` is cancelled
/// or a fatal error occurs.
///
/// Files named directly are started right away, at their current end.
/// Directories are watched recursively and files beneath them are started
/// when they are first created or written to. Every session is stopped and
/// joined before this returns.
pub async fn run(
    config: Config,
    sink: Arc<dyn Sink>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    if config.targets.is_empty() {
        tracing::warn!("No absolute file or directory paths given, nothing to tail");
        return Ok(());
    }

    let mode = config.watch_mode();
    let (coordinator, commands) =
        Coordinator::new(mode, config.pipeline(), sink, shutdown.clone())?;

    let mut directories = None;
    if config.directories().next().is_some() {
        directories = Some(DirectoryWatch::spawn(
            config.directories(),
            WatchFilter::new(config.exclude.clone()),
            mode,
            commands.clone(),
            coordinator.active_paths(),
        )?);
    }

    for file in config.files() {
        // The coordinator has not been dropped, so the channel is open.
        let _ = commands.start(file);
    }
    drop(commands);

    let coordinator = coordinator.run();
    tokio::pin!(coordinator);

    let Some(mut watch) = directories else {
        return coordinator.await;
    };

    let finished = tokio::select! {
        result = &mut coordinator => Finished::Coordinator(result),
        result = watch.join() => Finished::Watch(result),
    };

    match finished {
        Finished::Coordinator(result) => {
            watch.close();
            match (result, watch.join().await) {
                (Ok(()), joined) => joined,
                (Err(e), Err(other)) => {
                    tracing::error!(error = %other, "Directory watch failed during shutdown");
                    Err(e)
                }
                (Err(e), Ok(())) => Err(e),
            }
        }
        // The coordinator stopped taking commands, so it is already done.
        Finished::Watch(Ok(())) => coordinator.await,
        Finished::Watch(Err(e)) => {
            shutdown.cancel();
            if let Err(other) = coordinator.await {
                tracing::error!(error = %other, "Coordinator failed during shutdown");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchTarget;
    use crate::events::WatchMode;
    use crate::sink::ChannelSink;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_no_targets_returns_immediately() {
        let (sink, _records) = ChannelSink::new();

        timeout(
            Duration::from_secs(1),
            run(Config::default(), Arc::new(sink), CancellationToken::new()),
        )
        .await
        .expect("run should not block without targets")
        .unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let tmp_dir = TempDir::new().unwrap();
        let (sink, _records) = ChannelSink::new();
        let config = Config {
            poll: true,
            poll_interval: Duration::from_millis(10),
            targets: vec![WatchTarget::File(tmp_dir.path().join("missing.log"))],
            ..Config::default()
        };
        assert_eq!(config.watch_mode(), WatchMode::Poll(Duration::from_millis(10)));

        let err = timeout(
            Duration::from_secs(5),
            run(config, Arc::new(sink), CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, Error::Tail(crate::error::TailError::Open { .. })));
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let tmp_dir = TempDir::new().unwrap();
        let (sink, _records) = ChannelSink::new();
        let config = Config {
            targets: vec![WatchTarget::Directory(tmp_dir.path().join("gone"))],
            ..Config::default()
        };

        let err = run(config, Arc::new(sink), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Watch(_)));
    }

    #[tokio::test]
    async fn test_shutdown_ends_run() {
        let tmp_dir = TempDir::new().unwrap();
        let file = tmp_dir.path().join("app.log");
        std::fs::write(&file, "").unwrap();

        let (sink, _records) = ChannelSink::new();
        let config = Config {
            targets: vec![
                WatchTarget::File(file),
                WatchTarget::Directory(tmp_dir.path().to_path_buf()),
            ],
            exclude: crate::config::ExclusionRules::default(),
            ..Config::default()
        };

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(run(config, Arc::new(sink), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        // Returns only once the coordinator and the directory watch loop
        // have both been joined.
        timeout(Duration::from_secs(5), running)
            .await
            .expect("run did not stop after shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_joins_directory_watch() {
        let tmp_dir = TempDir::new().unwrap();
        let (sink, _records) = ChannelSink::new();
        let config = Config {
            targets: vec![WatchTarget::Directory(tmp_dir.path().to_path_buf())],
            exclude: crate::config::ExclusionRules::default(),
            ..Config::default()
        };

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Already cancelled: the coordinator ends first and the watch loop
        // must still be closed and joined cleanly.
        timeout(
            Duration::from_secs(5),
            run(config, Arc::new(sink), shutdown),
        )
        .await
        .expect("run did not join the directory watch")
        .unwrap();
    }
}
