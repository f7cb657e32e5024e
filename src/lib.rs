//! Follows a changing set of log files and emits every new line as one
//! leveled JSON record.
//!
//! Files can be named directly or discovered under recursively watched
//! directories. Each followed file is read from its end at the time it is
//! started, and keeps being followed across truncation, deletion and
//! re-creation, and rename-style rotation.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use logmux::{Config, Stdout, WatchTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), logmux::Error> {
//!     let config = Config {
//!         min_level: 4,
//!         targets: vec![
//!             WatchTarget::classify("/var/log/syslog"),
//!             WatchTarget::classify("/var/log/nginx"),
//!         ],
//!         ..Config::default()
//!     };
//!
//!     let shutdown = CancellationToken::new();
//!     logmux::run(config, Arc::new(Stdout), shutdown).await
//! }
//! ```
//!
//! ## Building blocks
//!
//! [`run`] is a thin layer over the [`Coordinator`], which owns every
//! [`TailSession`] and applies start and stop [`Command`]s in order, and
//! [`DirectoryWatch`], which turns filesystem events into those commands.
//! Lines are classified with [`classify`] and rendered by a [`Pipeline`].

pub mod cli;
mod classify;
mod config;
mod coordinator;
mod daemon;
mod error;
mod events;
mod format;
pub mod logging;
mod reader;
mod sink;
mod watch;

pub use classify::{classify, Level};
pub use config::{normalize, Config, ExclusionRules, WatchTarget, DEFAULT_EXCLUDE};
pub use coordinator::{ActivePaths, Command, CommandSender, Coordinator};
pub use daemon::run;
pub use error::{Error, TailError, WatchError};
pub use events::{FileEvents, WatchMode, DEFAULT_POLL_INTERVAL};
pub use format::{components, is_json_shaped, Pipeline};
pub use notify::event;
pub use reader::{Line, TailSession, Wakeup};
pub use sink::{ChannelSink, Sink, Stdout};
pub use watch::{translate, DirectoryWatch, WatchFilter};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
